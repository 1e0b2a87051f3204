use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, timeout};

use crate::core::{AddressBook, Config, PeerAddr, TransferMessage};
use crate::storage::FileDirectory;
use crate::utils::{Result, ShareError};

/// Failure of one download attempt. Transient failures burn a retry against
/// the same peer; permanent ones move straight to the next candidate.
enum Attempt {
    Transient(ShareError),
    Permanent(ShareError),
}

type AttemptResult<T> = std::result::Result<T, Attempt>;

/// Client side of the transfer protocol: pulls a file from the candidate peer
/// list with per-peer retries, timeouts, and content hash verification.
pub struct Downloader {
    address_book: Arc<RwLock<AddressBook>>,
    directory: Arc<Mutex<FileDirectory>>,
    downloads_dir: PathBuf,
    io_timeout: Duration,
    retries: u32,
    backoff: Duration,
    block_size: usize,
}

impl Downloader {
    pub fn new(
        config: &Config,
        address_book: Arc<RwLock<AddressBook>>,
        directory: Arc<Mutex<FileDirectory>>,
    ) -> Self {
        Self {
            address_book,
            directory,
            downloads_dir: config.downloads_dir.clone(),
            io_timeout: config.io_timeout(),
            retries: config.download_retries,
            backoff: config.retry_backoff(),
            block_size: config.block_size,
        }
    }

    /// Fetch a file by content hash, trying each known provider in turn.
    /// Repeated fetches of an already-held hash return the existing path
    /// without touching the network.
    pub async fn fetch(&self, file_hash: &str, save_as: Option<&str>) -> Result<PathBuf> {
        if let Some(path) = self.directory.lock().await.local_path(file_hash) {
            debug!("{} already held locally at {}", file_hash, path.display());
            return Ok(path);
        }

        let (candidates, listed_name) = {
            let directory = self.directory.lock().await;
            (
                directory.candidate_peers(file_hash),
                directory.display_name(file_hash),
            )
        };
        if candidates.is_empty() {
            return Err(ShareError::NotInNetwork(file_hash.to_string()));
        }
        let file_name = save_as
            .map(str::to_string)
            .or(listed_name)
            .unwrap_or_else(|| file_hash.to_string());

        let mut last_error: Option<ShareError> = None;
        for peer in candidates {
            match self.fetch_from_peer(&peer, file_hash, &file_name).await {
                Ok(path) => {
                    self.directory
                        .lock()
                        .await
                        .record_local(file_hash, &file_name, path.clone());
                    info!("Downloaded {} ({}) from {}", file_name, file_hash, peer);
                    return Ok(path);
                }
                Err(e) => {
                    warn!("Download of {} from {} failed: {}", file_hash, peer, e);
                    self.evict(&peer).await;
                    last_error = Some(e);
                }
            }
        }

        Err(ShareError::AllPeersFailed {
            hash: file_hash.to_string(),
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no error recorded".to_string()),
        })
    }

    /// Up to `1 + retries` attempts against a single peer. Refusals and
    /// protocol-level rejections abort immediately; timeouts burn an attempt
    /// and back off before the next one.
    async fn fetch_from_peer(
        &self,
        peer: &PeerAddr,
        file_hash: &str,
        file_name: &str,
    ) -> Result<PathBuf> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt_download(peer, file_hash, file_name).await {
                Ok(path) => return Ok(path),
                Err(Attempt::Permanent(e)) => return Err(e),
                Err(Attempt::Transient(e)) => {
                    if attempts > self.retries {
                        return Err(e);
                    }
                    debug!(
                        "Retrying {} against {} after {:?} ({})",
                        file_hash, peer, self.backoff, e
                    );
                    sleep(self.backoff).await;
                }
            }
        }
    }

    async fn attempt_download(
        &self,
        peer: &PeerAddr,
        file_hash: &str,
        file_name: &str,
    ) -> AttemptResult<PathBuf> {
        let stream = match timeout(self.io_timeout, TcpStream::connect(peer.transfer_endpoint()))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                return Err(Attempt::Permanent(ShareError::ConnectionFailed(format!(
                    "{} refused transfer connection: {}",
                    peer, e
                ))));
            }
            Ok(Err(e)) => {
                return Err(Attempt::Transient(ShareError::ConnectionFailed(format!(
                    "Failed to connect to {}: {}",
                    peer, e
                ))));
            }
            Err(_) => {
                return Err(Attempt::Transient(ShareError::Timeout(format!(
                    "connecting to {}",
                    peer
                ))));
            }
        };
        let mut stream = BufReader::new(stream);

        let request = TransferMessage::FileRequest {
            file_hash: file_hash.to_string(),
        };
        let line = request
            .to_line()
            .map_err(|e| Attempt::Permanent(e.into()))?;
        match timeout(self.io_timeout, stream.get_mut().write_all(&line)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(Attempt::Transient(ShareError::Network(format!(
                    "Failed to send request to {}: {}",
                    peer, e
                ))));
            }
            Err(_) => {
                return Err(Attempt::Transient(ShareError::Timeout(format!(
                    "sending request to {}",
                    peer
                ))));
            }
        }

        let mut header = String::new();
        match timeout(self.io_timeout, stream.read_line(&mut header)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(Attempt::Transient(ShareError::Network(format!(
                    "Failed to read response header from {}: {}",
                    peer, e
                ))));
            }
            Err(_) => {
                return Err(Attempt::Transient(ShareError::Timeout(format!(
                    "waiting for response header from {}",
                    peer
                ))));
            }
        }
        match serde_json::from_str::<TransferMessage>(header.trim_end()) {
            Ok(TransferMessage::FileData) => {}
            Ok(TransferMessage::Error { message }) => {
                return Err(Attempt::Permanent(ShareError::PeerRejected {
                    peer: peer.to_string(),
                    reason: message,
                }));
            }
            Ok(other) => {
                return Err(Attempt::Permanent(ShareError::MalformedMessage(format!(
                    "Unexpected response header from {}: {:?}",
                    peer, other
                ))));
            }
            Err(e) => {
                return Err(Attempt::Permanent(ShareError::MalformedMessage(format!(
                    "Unreadable response header from {}: {}",
                    peer, e
                ))));
            }
        }

        self.receive_body(&mut stream, peer, file_hash, file_name)
            .await
    }

    /// Stream the body into the downloads directory, hashing as it arrives.
    /// A stall before the first byte fails the attempt; a stall mid-stream is
    /// ridden out until the peer closes the connection.
    async fn receive_body(
        &self,
        stream: &mut BufReader<TcpStream>,
        peer: &PeerAddr,
        file_hash: &str,
        file_name: &str,
    ) -> AttemptResult<PathBuf> {
        fs::create_dir_all(&self.downloads_dir).await.map_err(|e| {
            Attempt::Permanent(ShareError::Io(format!(
                "Failed to create downloads directory: {}",
                e
            )))
        })?;
        let dest = self.downloads_dir.join(file_name);
        let mut file = fs::File::create(&dest).await.map_err(|e| {
            Attempt::Permanent(ShareError::Io(format!(
                "Failed to create {}: {}",
                dest.display(),
                e
            )))
        })?;

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.block_size];
        let mut received: u64 = 0;
        loop {
            match timeout(self.io_timeout, stream.read(&mut buf)).await {
                Ok(Ok(0)) => break, // peer closed: end of stream
                Ok(Ok(n)) => {
                    hasher.update(&buf[..n]);
                    if let Err(e) = file.write_all(&buf[..n]).await {
                        let _ = fs::remove_file(&dest).await;
                        return Err(Attempt::Permanent(ShareError::Io(format!(
                            "Failed to write {}: {}",
                            dest.display(),
                            e
                        ))));
                    }
                    received += n as u64;
                }
                Ok(Err(e)) => {
                    let _ = fs::remove_file(&dest).await;
                    return Err(Attempt::Transient(ShareError::Network(format!(
                        "Read from {} failed: {}",
                        peer, e
                    ))));
                }
                Err(_) if received == 0 => {
                    let _ = fs::remove_file(&dest).await;
                    return Err(Attempt::Transient(ShareError::Timeout(format!(
                        "no data received from {}",
                        peer
                    ))));
                }
                Err(_) => {
                    // Partial data and a slow peer: keep waiting for the close.
                    debug!(
                        "Stream from {} stalled at {} bytes, still waiting",
                        peer, received
                    );
                }
            }
        }

        if let Err(e) = file.flush().await {
            let _ = fs::remove_file(&dest).await;
            return Err(Attempt::Permanent(ShareError::Io(e.to_string())));
        }
        drop(file);

        let actual = hex::encode(hasher.finalize());
        if actual != file_hash {
            warn!(
                "Hash mismatch from {}: expected {}, got {}",
                peer, file_hash, actual
            );
            let _ = fs::remove_file(&dest).await;
            return Err(Attempt::Permanent(ShareError::HashMismatch {
                expected: file_hash.to_string(),
                actual,
            }));
        }

        debug!("Received {} bytes from {} for {}", received, peer, file_hash);
        Ok(dest)
    }

    /// Same cascade as the discovery side: address book and catalog are
    /// updated together so stale candidates disappear in one pass.
    async fn evict(&self, peer: &PeerAddr) {
        self.address_book.write().await.remove(peer);
        self.directory.lock().await.drop_peer(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::HashUtils;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    struct Fixture {
        downloader: Downloader,
        address_book: Arc<RwLock<AddressBook>>,
        directory: Arc<Mutex<FileDirectory>>,
        _downloads: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let downloads = tempfile::tempdir().unwrap();
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 9001,
            downloads_dir: downloads.path().to_path_buf(),
            retry_backoff_secs: 0,
            io_timeout_secs: 5,
            ..Config::default()
        };
        let address_book = Arc::new(RwLock::new(AddressBook::new()));
        let directory = Arc::new(Mutex::new(FileDirectory::new(config.self_addr())));
        let downloader = Downloader::new(&config, address_book.clone(), directory.clone());
        Fixture {
            downloader,
            address_book,
            directory,
            _downloads: downloads,
        }
    }

    /// A peer that answers every request with a fixed body (which may not
    /// match the hash it is asked for).
    async fn rogue_peer(body: &'static [u8]) -> PeerAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let stream = match listener.accept().await {
                    Ok((stream, _)) => stream,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    let mut stream = BufReader::new(stream);
                    let mut line = String::new();
                    let _ = stream.read_line(&mut line).await;
                    let header = TransferMessage::FileData.to_line().unwrap();
                    let _ = stream.get_mut().write_all(&header).await;
                    let _ = stream.get_mut().write_all(body).await;
                });
            }
        });
        // The advertised discovery port sits one below the transfer port.
        PeerAddr::new("127.0.0.1", port - 1)
    }

    #[tokio::test]
    async fn unknown_hash_fails_without_candidates() {
        let fx = fixture();
        let result = fx.downloader.fetch("missing", None).await;
        assert!(matches!(result, Err(ShareError::NotInNetwork(_))));
    }

    #[tokio::test]
    async fn refused_connection_evicts_the_peer_and_exhausts() {
        let fx = fixture();

        // A port with no transfer listener behind it.
        let dead = PeerAddr::new("127.0.0.1", 1);
        fx.address_book.write().await.touch(dead.clone());
        fx.directory
            .lock()
            .await
            .record_remote("h1", "a.txt", dead.clone());

        let result = fx.downloader.fetch("h1", None).await;

        assert!(matches!(result, Err(ShareError::AllPeersFailed { .. })));
        assert!(!fx.address_book.read().await.contains(&dead));
        assert!(fx.directory.lock().await.candidate_peers("h1").is_empty());
    }

    #[tokio::test]
    async fn corrupted_body_is_deleted_and_the_peer_evicted() {
        let fx = fixture();
        let rogue = rogue_peer(b"not the real bytes").await;

        let wanted = HashUtils::hash_data(b"the real bytes");
        fx.directory
            .lock()
            .await
            .record_remote(&wanted, "real.bin", rogue.clone());

        let result = fx.downloader.fetch(&wanted, None).await;

        assert!(matches!(result, Err(ShareError::AllPeersFailed { .. })));
        // No partial file survives the mismatch and the holding was never made.
        assert!(!fx._downloads.path().join("real.bin").exists());
        assert!(fx.directory.lock().await.local_path(&wanted).is_none());
        assert!(fx.directory.lock().await.candidate_peers(&wanted).is_empty());
    }

    #[tokio::test]
    async fn falls_through_to_the_next_candidate_on_failure() {
        let fx = fixture();

        let wanted = HashUtils::hash_data(b"good content");
        let dead = PeerAddr::new("127.0.0.1", 1);
        let good = rogue_peer(b"good content").await;

        {
            let mut directory = fx.directory.lock().await;
            directory.record_remote(&wanted, "good.bin", dead.clone());
            directory.record_remote(&wanted, "good.bin", good.clone());
        }
        fx.address_book.write().await.touch(dead.clone());
        fx.address_book.write().await.touch(good.clone());

        let path = fx.downloader.fetch(&wanted, None).await.unwrap();

        assert_eq!(HashUtils::hash_file(&path).unwrap(), wanted);
        // The dead candidate was evicted along the way; the good one remains.
        assert!(!fx.address_book.read().await.contains(&dead));
        assert!(fx.address_book.read().await.contains(&good));
        assert_eq!(fx.directory.lock().await.local_path(&wanted), Some(path));
    }

    #[tokio::test]
    async fn save_as_overrides_the_advertised_name() {
        let fx = fixture();
        let wanted = HashUtils::hash_data(b"renamed content");
        let peer = rogue_peer(b"renamed content").await;
        fx.directory
            .lock()
            .await
            .record_remote(&wanted, "original.bin", peer);

        let path = fx.downloader.fetch(&wanted, Some("renamed.bin")).await.unwrap();

        assert_eq!(path.file_name().unwrap(), "renamed.bin");
    }

    #[tokio::test]
    async fn already_held_files_short_circuit() {
        let fx = fixture();
        let existing = PathBuf::from("/somewhere/already.bin");
        fx.directory
            .lock()
            .await
            .record_local("h1", "already.bin", existing.clone());

        // No candidates, no listeners: success is only possible via the
        // local-holdings short circuit.
        let path = fx.downloader.fetch("h1", None).await.unwrap();
        assert_eq!(path, existing);
    }
}
