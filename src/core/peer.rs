use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Address of a peer's discovery endpoint.
///
/// The transfer endpoint is always `port + 1` on the same host; it is never
/// configured independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Discovery endpoint as a connectable (host, port) pair.
    pub fn discovery_endpoint(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }

    /// Transfer endpoint of the same peer.
    pub fn transfer_endpoint(&self) -> (&str, u16) {
        (self.host.as_str(), self.port + 1)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Liveness registry: which peers exist and when each was last heard from.
///
/// A record exists from the first hello or hello-response received from an
/// address and is refreshed on every subsequent message. Removal cascades into
/// the file directory; the owning service invokes both together.
pub struct AddressBook {
    peers: HashMap<PeerAddr, Instant>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Insert-or-refresh a peer's last-seen time.
    pub fn touch(&mut self, addr: PeerAddr) {
        self.peers.insert(addr, Instant::now());
    }

    pub fn remove(&mut self, addr: &PeerAddr) -> bool {
        self.peers.remove(addr).is_some()
    }

    pub fn contains(&self, addr: &PeerAddr) -> bool {
        self.peers.contains_key(addr)
    }

    /// Peers whose last message is older than `threshold`.
    pub fn expired(&self, threshold: Duration) -> Vec<PeerAddr> {
        self.peers
            .iter()
            .filter(|(_, seen)| seen.elapsed() > threshold)
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    pub fn addrs(&self) -> Vec<PeerAddr> {
        self.peers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl Default for AddressBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> PeerAddr {
        PeerAddr::new("127.0.0.1", port)
    }

    #[test]
    fn touch_inserts_and_refreshes() {
        let mut book = AddressBook::new();
        book.touch(addr(9001));
        book.touch(addr(9001));

        assert_eq!(book.len(), 1);
        assert!(book.contains(&addr(9001)));
    }

    #[test]
    fn remove_reports_whether_the_peer_existed() {
        let mut book = AddressBook::new();
        book.touch(addr(9001));

        assert!(book.remove(&addr(9001)));
        assert!(!book.remove(&addr(9001)));
        assert!(book.is_empty());
    }

    #[test]
    fn expired_returns_only_stale_peers() {
        let mut book = AddressBook::new();
        book.touch(addr(9001));

        // Fresh against a realistic threshold.
        assert!(book.expired(Duration::from_secs(30)).is_empty());

        // Stale against a zero threshold once any time has passed.
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(book.expired(Duration::ZERO), vec![addr(9001)]);
    }

    #[test]
    fn transfer_endpoint_is_the_adjacent_port() {
        assert_eq!(addr(9001).transfer_endpoint(), ("127.0.0.1", 9002));
    }
}
