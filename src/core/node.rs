use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::core::{AddressBook, Config, PeerAddr};
use crate::network::Discovery;
use crate::storage::{FileDirectory, FileEntry, HashUtils, LocalHolding};
use crate::transfer::{Downloader, Uploader};
use crate::utils::{Result, ShareError};

/// A running peer: discovery, transfer, and the shared stores behind one
/// facade. Outer layers (a UI, a CLI) only call these methods and read the
/// snapshots; they never touch the stores directly.
pub struct Node {
    config: Config,
    address_book: Arc<RwLock<AddressBook>>,
    directory: Arc<Mutex<FileDirectory>>,
    discovery: Arc<Discovery>,
    downloader: Downloader,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Bind both endpoints and spawn the background loops. The announce loop
    /// greets the network immediately, so a freshly started node is visible
    /// without further calls.
    pub async fn start(config: Config) -> Result<Self> {
        if config.port == u16::MAX {
            return Err(ShareError::Config(
                "Discovery port must leave room for the transfer port above it".to_string(),
            ));
        }

        let address_book = Arc::new(RwLock::new(AddressBook::new()));
        let directory = Arc::new(Mutex::new(FileDirectory::new(config.self_addr())));

        let discovery = Arc::new(
            Discovery::bind(&config, address_book.clone(), directory.clone()).await?,
        );

        let transfer_addr = format!("{}:{}", config.host, config.port + 1);
        let listener = TcpListener::bind(&transfer_addr).await.map_err(|e| {
            ShareError::Network(format!(
                "Failed to bind transfer socket {}: {}",
                transfer_addr, e
            ))
        })?;
        info!("Transfer listening on {}", transfer_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let uploader = Arc::new(Uploader::new(
            directory.clone(),
            config.block_size,
            config.io_timeout(),
        ));
        let downloader = Downloader::new(&config, address_book.clone(), directory.clone());

        let tasks = vec![
            discovery.clone().spawn_inbound_loop(shutdown_rx.clone()),
            discovery.clone().spawn_announce_loop(shutdown_rx.clone()),
            uploader.spawn_accept_loop(listener, shutdown_rx),
        ];

        info!(
            "Node up on {}:{} (transfer on port {})",
            config.host,
            config.port,
            config.port + 1
        );

        Ok(Self {
            config,
            address_book,
            directory,
            discovery,
            downloader,
            shutdown_tx,
            tasks,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Share a file: hash it, register it locally, and tell the network.
    /// Sharing the same bytes twice yields the same hash and changes nothing.
    pub async fn share_file(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| ShareError::FileNotFound(path.display().to_string()))?;
        if !metadata.is_file() {
            return Err(ShareError::FileNotFound(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let content = tokio::fs::read(path).await?;
        let file_hash = HashUtils::hash_data(&content);
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| file_hash.clone());

        self.directory
            .lock()
            .await
            .record_local(&file_hash, &file_name, path.to_path_buf());
        self.discovery.announce_file(&file_hash, &file_name).await;

        info!("Shared file {} ({})", file_name, file_hash);
        Ok(file_hash)
    }

    /// Fetch a file by content hash, trying each known provider in turn.
    pub async fn request_file(&self, file_hash: &str, save_as: Option<&str>) -> Result<PathBuf> {
        self.downloader.fetch(file_hash, save_as).await
    }

    /// Run a discovery round now instead of waiting for the next timer tick.
    pub async fn discover_peers(&self) {
        self.discovery.greet_network().await;
    }

    /// Number of live peers.
    pub async fn peer_count(&self) -> usize {
        self.address_book.read().await.len()
    }

    /// Addresses of all live peers.
    pub async fn known_peers(&self) -> Vec<PeerAddr> {
        self.address_book.read().await.addrs()
    }

    /// The files table: everything discoverable right now.
    pub async fn file_table(&self) -> Vec<FileEntry> {
        self.directory.lock().await.entries()
    }

    /// Files held on this node's disk.
    pub async fn local_holdings(&self) -> Vec<(String, LocalHolding)> {
        self.directory.lock().await.local_holdings()
    }

    /// Graceful shutdown: goodbye to every known peer, stop the loops, and
    /// join them. Handlers mid-transfer are left to finish on their own.
    pub async fn stop(&mut self) -> Result<()> {
        self.discovery.broadcast_goodbye().await;

        if self.shutdown_tx.send(true).is_err() {
            warn!("Shutdown receivers already gone");
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Background task panicked: {}", e);
            }
        }

        info!("Node stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::time::Duration;
    use tokio::net::{TcpListener, UdpSocket};
    use tokio::time::sleep;

    /// A UDP port whose +1 TCP neighbour is also free, probed on loopback.
    async fn free_port_pair() -> u16 {
        for _ in 0..50 {
            let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let port = udp.local_addr().unwrap().port();
            if port == u16::MAX {
                continue;
            }
            if TcpListener::bind(("127.0.0.1", port + 1)).await.is_ok() {
                drop(udp);
                return port;
            }
        }
        panic!("no free adjacent port pair found");
    }

    fn test_config(port: u16, downloads: &Path) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port,
            bootstrap_nodes: Vec::new(),
            enable_broadcast: false,
            downloads_dir: downloads.to_path_buf(),
            retry_backoff_secs: 0,
            io_timeout_secs: 5,
            ..Config::default()
        }
    }

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    /// Poll until `check` passes or a couple of seconds elapse.
    async fn wait_until<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return true;
            }
            sleep(Duration::from_millis(25)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sharing_twice_is_idempotent() {
        let files = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();
        let path = write_file(files.path(), "doc.txt", b"same bytes");

        let port = free_port_pair().await;
        let mut node = Node::start(test_config(port, downloads.path())).await.unwrap();

        let first = node.share_file(&path).await.unwrap();
        let second = node.share_file(&path).await.unwrap();

        assert_eq!(first, second);
        let table = node.file_table().await;
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].peer_count, 1); // only our own entry, once

        node.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn requesting_a_held_file_returns_the_existing_path() {
        let files = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();
        let path = write_file(files.path(), "doc.txt", b"already here");

        let port = free_port_pair().await;
        let mut node = Node::start(test_config(port, downloads.path())).await.unwrap();

        let hash = node.share_file(&path).await.unwrap();
        let resolved = node.request_file(&hash, None).await.unwrap();

        // The original path comes back; nothing lands in the downloads dir.
        assert_eq!(resolved, path);
        assert_eq!(std::fs::read_dir(downloads.path()).unwrap().count(), 0);

        node.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn file_flows_from_sharer_to_requester() {
        let files = tempfile::tempdir().unwrap();
        let downloads_a = tempfile::tempdir().unwrap();
        let downloads_b = tempfile::tempdir().unwrap();
        let payload = b"gossip then pull".to_vec();
        let path = write_file(files.path(), "shared.bin", &payload);

        let port_a = free_port_pair().await;
        let mut node_a = Node::start(test_config(port_a, downloads_a.path()))
            .await
            .unwrap();
        let hash = node_a.share_file(&path).await.unwrap();

        let port_b = free_port_pair().await;
        let mut config_b = test_config(port_b, downloads_b.path());
        config_b.bootstrap_nodes = vec![PeerAddr::new("127.0.0.1", port_a)];
        let mut node_b = Node::start(config_b).await.unwrap();

        // B's startup hello reaches A; A's hello_response carries the holding.
        let learned = {
            let hash = hash.clone();
            wait_until(|| {
                let node_b = &node_b;
                let hash = hash.clone();
                async move {
                    node_b
                        .file_table()
                        .await
                        .iter()
                        .any(|entry| entry.hash == hash)
                }
            })
            .await
        };
        assert!(learned, "node B never learned of the shared file");
        assert_eq!(node_b.peer_count().await, 1);

        let local = node_b.request_file(&hash, None).await.unwrap();
        assert_eq!(HashUtils::hash_file(&local).unwrap(), hash);
        assert!(node_b
            .local_holdings()
            .await
            .iter()
            .any(|(held, _)| *held == hash));

        node_b.stop().await.unwrap();
        node_a.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn goodbye_removes_the_peer_and_its_files() {
        let files = tempfile::tempdir().unwrap();
        let downloads_a = tempfile::tempdir().unwrap();
        let downloads_b = tempfile::tempdir().unwrap();
        let path = write_file(files.path(), "leaving.bin", b"gone soon");

        let port_a = free_port_pair().await;
        let mut node_a = Node::start(test_config(port_a, downloads_a.path()))
            .await
            .unwrap();

        let port_b = free_port_pair().await;
        let mut config_b = test_config(port_b, downloads_b.path());
        config_b.bootstrap_nodes = vec![PeerAddr::new("127.0.0.1", port_a)];
        let mut node_b = Node::start(config_b).await.unwrap();

        // Wait for the hello exchange, then share: the announcement reaches A.
        assert!(
            wait_until(|| {
                let node_b = &node_b;
                async move { node_b.peer_count().await == 1 }
            })
            .await
        );
        let hash = node_b.share_file(&path).await.unwrap();

        let a_learned = {
            let hash = hash.clone();
            wait_until(|| {
                let node_a = &node_a;
                let hash = hash.clone();
                async move {
                    node_a
                        .file_table()
                        .await
                        .iter()
                        .any(|entry| entry.hash == hash)
                }
            })
            .await
        };
        assert!(a_learned, "node A never saw the announcement");

        node_b.stop().await.unwrap();

        // The goodbye evicts B and orphans its only file.
        let forgotten = wait_until(|| {
            let node_a = &node_a;
            async move { node_a.file_table().await.is_empty() && node_a.peer_count().await == 0 }
        })
        .await;
        assert!(forgotten, "node A kept state for the departed peer");

        let result = node_a.request_file(&hash, None).await;
        assert!(matches!(result, Err(ShareError::NotInNetwork(_))));

        node_a.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn download_falls_back_past_an_unreachable_peer() {
        let files = tempfile::tempdir().unwrap();
        let downloads_a = tempfile::tempdir().unwrap();
        let downloads_d = tempfile::tempdir().unwrap();
        let path = write_file(files.path(), "resilient.bin", b"still reachable");

        // D really holds the file.
        let port_d = free_port_pair().await;
        let mut node_d = Node::start(test_config(port_d, downloads_d.path()))
            .await
            .unwrap();
        let hash = node_d.share_file(&path).await.unwrap();

        // A believes both C (nobody listening) and D hold it, C first.
        let port_a = free_port_pair().await;
        let mut node_a = Node::start(test_config(port_a, downloads_a.path()))
            .await
            .unwrap();
        let unreachable = PeerAddr::new("127.0.0.1", 1);
        {
            let mut directory = node_a.directory.lock().await;
            directory.record_remote(&hash, "resilient.bin", unreachable.clone());
            directory.record_remote(&hash, "resilient.bin", PeerAddr::new("127.0.0.1", port_d));
        }
        node_a.address_book.write().await.touch(unreachable.clone());

        let local = node_a.request_file(&hash, None).await.unwrap();

        assert_eq!(HashUtils::hash_file(&local).unwrap(), hash);
        assert!(!node_a.address_book.read().await.contains(&unreachable));

        node_a.stop().await.unwrap();
        node_d.stop().await.unwrap();
    }
}
