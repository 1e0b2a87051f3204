use log::{debug, info};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::core::PeerAddr;

/// A remotely advertised file: display name plus the peers known to hold it,
/// in the order they were first heard from.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub name: String,
    pub peers: Vec<PeerAddr>,
}

/// A file this node holds on disk.
#[derive(Debug, Clone)]
pub struct LocalHolding {
    pub name: String,
    pub path: PathBuf,
}

/// Row of the files table exposed to outer layers.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub hash: String,
    pub name: String,
    pub peer_count: usize,
}

/// Location catalog: which content hash is held where, plus this node's own
/// holdings. The node's own address appears as a provider for everything it
/// holds locally, so it is its own first candidate in other nodes' eyes.
pub struct FileDirectory {
    self_addr: PeerAddr,
    remote: HashMap<String, FileRecord>,
    local: HashMap<String, LocalHolding>,
}

impl FileDirectory {
    pub fn new(self_addr: PeerAddr) -> Self {
        Self {
            self_addr,
            remote: HashMap::new(),
            local: HashMap::new(),
        }
    }

    /// Record that `peer` holds `hash`. The first sighting creates the record;
    /// repeat sightings from the same peer are no-ops (set semantics).
    pub fn record_remote(&mut self, hash: &str, name: &str, peer: PeerAddr) {
        let record = self
            .remote
            .entry(hash.to_string())
            .or_insert_with(|| FileRecord {
                name: name.to_string(),
                peers: Vec::new(),
            });
        if !record.peers.contains(&peer) {
            debug!("Added file {} ({}) from peer {}", name, hash, peer);
            record.peers.push(peer);
        }
    }

    /// Register a file held on this node's disk and list ourselves as a
    /// provider, making the file immediately discoverable.
    pub fn record_local(&mut self, hash: &str, name: &str, path: PathBuf) {
        self.local.insert(
            hash.to_string(),
            LocalHolding {
                name: name.to_string(),
                path,
            },
        );
        let self_addr = self.self_addr.clone();
        self.record_remote(hash, name, self_addr);
    }

    /// Strip `peer` from every record; records left with no provider are
    /// dropped entirely. This is the only path that deletes a record.
    pub fn drop_peer(&mut self, peer: &PeerAddr) {
        self.remote.retain(|hash, record| {
            record.peers.retain(|p| p != peer);
            if record.peers.is_empty() {
                info!(
                    "No more peers hold {} ({}), dropping",
                    record.name, hash
                );
                false
            } else {
                true
            }
        });
    }

    /// Providers for `hash`, first-heard first. Empty if unknown.
    pub fn candidate_peers(&self, hash: &str) -> Vec<PeerAddr> {
        self.remote
            .get(hash)
            .map(|record| record.peers.clone())
            .unwrap_or_default()
    }

    pub fn display_name(&self, hash: &str) -> Option<String> {
        self.remote.get(hash).map(|record| record.name.clone())
    }

    pub fn local_holding(&self, hash: &str) -> Option<LocalHolding> {
        self.local.get(hash).cloned()
    }

    pub fn local_path(&self, hash: &str) -> Option<PathBuf> {
        self.local.get(hash).map(|holding| holding.path.clone())
    }

    /// hash -> display name of everything held locally, in the shape a
    /// hello-response carries.
    pub fn local_files(&self) -> HashMap<String, String> {
        self.local
            .iter()
            .map(|(hash, holding)| (hash.clone(), holding.name.clone()))
            .collect()
    }

    pub fn local_holdings(&self) -> Vec<(String, LocalHolding)> {
        self.local
            .iter()
            .map(|(hash, holding)| (hash.clone(), holding.clone()))
            .collect()
    }

    /// Snapshot of the whole catalog for display, name-sorted.
    pub fn entries(&self) -> Vec<FileEntry> {
        let mut entries: Vec<FileEntry> = self
            .remote
            .iter()
            .map(|(hash, record)| FileEntry {
                hash: hash.clone(),
                name: record.name.clone(),
                peer_count: record.peers.len(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn file_count(&self) -> usize {
        self.remote.len()
    }
}
