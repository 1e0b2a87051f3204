//! Serverless LAN file sharing.
//!
//! Nodes find each other over UDP gossip, advertise which files they hold, and
//! pull file contents from one another over TCP with SHA-256 verification.
//! There is no central authority and no multi-hop routing: a node only learns
//! about files from peers it has exchanged discovery messages with directly.

pub mod core;
pub mod network;
pub mod storage;
pub mod transfer;
pub mod utils;

// Re-export main types
pub use crate::core::{Config, Node, PeerAddr};
pub use crate::network::Discovery;
pub use crate::storage::{FileDirectory, FileEntry, HashUtils, LocalHolding};
pub use crate::utils::{setup_logging, Result, ShareError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
