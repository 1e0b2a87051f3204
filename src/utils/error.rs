use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShareError>;

#[derive(Error, Debug)]
pub enum ShareError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Peer {peer} rejected request: {reason}")]
    PeerRejected { peer: String, reason: String },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File not found in network: {0}")]
    NotInNetwork(String),

    #[error("Failed to download file from any peer: {hash} (last error: {last})")]
    AllPeersFailed { hash: String, last: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for ShareError {
    fn from(err: std::io::Error) -> Self {
        ShareError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ShareError {
    fn from(err: serde_json::Error) -> Self {
        ShareError::Serialization(err.to_string())
    }
}
