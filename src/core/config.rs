use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::PeerAddr;

/// Node configuration.
///
/// The timing and retry fields are protocol constants: nodes that need to
/// interoperate should agree on them. Defaults match the deployed behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind and to advertise in gossip messages.
    pub host: String,
    /// UDP discovery port; the TCP transfer endpoint binds `port + 1`.
    pub port: u16,
    /// Peers contacted unconditionally whenever discovery runs.
    pub bootstrap_nodes: Vec<PeerAddr>,
    /// Also probe the local broadcast address on each discovery round.
    pub enable_broadcast: bool,
    /// Directory downloaded files are written to.
    pub downloads_dir: PathBuf,
    /// Seconds of silence after which a peer is considered gone.
    pub liveness_threshold_secs: u64,
    /// Seconds between self-announce rounds.
    pub announce_interval_secs: u64,
    /// Extra download attempts per peer after the first failure.
    pub download_retries: u32,
    /// Seconds to pause between attempts against the same peer.
    pub retry_backoff_secs: u64,
    /// I/O deadline in seconds for transfer connect/read/write.
    pub io_timeout_secs: u64,
    /// Block size for streaming file bytes.
    pub block_size: usize,
}

impl Config {
    /// The address this node advertises, and filters out of inbound gossip.
    pub fn self_addr(&self) -> PeerAddr {
        PeerAddr::new(self.host.clone(), self.port)
    }

    pub fn liveness_threshold(&self) -> Duration {
        Duration::from_secs(self.liveness_threshold_secs)
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9001,
            bootstrap_nodes: Vec::new(),
            enable_broadcast: true,
            downloads_dir: PathBuf::from("downloads"),
            liveness_threshold_secs: 30,
            announce_interval_secs: 30,
            download_retries: 2,
            retry_backoff_secs: 1,
            io_timeout_secs: 30,
            block_size: 8192,
        }
    }
}
