use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Gossip datagrams exchanged on the discovery port.
///
/// The JSON `type` field selects the variant. Senders identify themselves by
/// the declared host/port, which may differ from the UDP source address; all
/// replies go to the declared address. `Goodbye` carries nothing, so there the
/// UDP source is the only identity available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryMessage {
    Hello {
        host: String,
        port: u16,
    },
    HelloResponse {
        host: String,
        port: u16,
        files: HashMap<String, String>,
    },
    AnnounceFile {
        file_hash: String,
        file_name: String,
        host: String,
        port: u16,
    },
    Goodbye,
}

/// Request and response headers on the transfer stream.
///
/// Each is a single JSON line. After a `FileData` header the raw file bytes
/// follow until the sender closes the connection; there is no length header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferMessage {
    FileRequest { file_hash: String },
    FileData,
    Error { message: String },
}

impl TransferMessage {
    /// Newline-terminated wire encoding.
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut data = serde_json::to_vec(self)?;
        data.push(b'\n');
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_wire_shape() {
        let message = DiscoveryMessage::Hello {
            host: "10.0.0.5".to_string(),
            port: 9001,
        };
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["type"], "hello");
        assert_eq!(json["host"], "10.0.0.5");
        assert_eq!(json["port"], 9001);
    }

    #[test]
    fn hello_response_carries_the_files_map() {
        let raw = r#"{"type":"hello_response","host":"10.0.0.5","port":9001,
                      "files":{"abc123":"notes.txt"}}"#;
        let message: DiscoveryMessage = serde_json::from_str(raw).unwrap();

        match message {
            DiscoveryMessage::HelloResponse { files, .. } => {
                assert_eq!(files.get("abc123").map(String::as_str), Some("notes.txt"));
            }
            other => panic!("parsed wrong variant: {:?}", other),
        }
    }

    #[test]
    fn goodbye_is_a_bare_type_field() {
        let data = serde_json::to_string(&DiscoveryMessage::Goodbye).unwrap();
        assert_eq!(data, r#"{"type":"goodbye"}"#);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<DiscoveryMessage>(r#"{"type":"wave"}"#).is_err());
    }

    #[test]
    fn missing_fields_are_rejected() {
        // announce_file without a file_hash must not parse.
        let raw = r#"{"type":"announce_file","file_name":"a.txt","host":"h","port":1}"#;
        assert!(serde_json::from_str::<DiscoveryMessage>(raw).is_err());
    }

    #[test]
    fn transfer_request_round_trips_as_a_line() {
        let request = TransferMessage::FileRequest {
            file_hash: "deadbeef".to_string(),
        };
        let line = request.to_line().unwrap();

        assert_eq!(line.last(), Some(&b'\n'));
        let parsed: TransferMessage =
            serde_json::from_slice(&line[..line.len() - 1]).unwrap();
        assert_eq!(parsed, request);
    }
}
