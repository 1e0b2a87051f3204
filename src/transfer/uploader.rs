use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::core::TransferMessage;
use crate::storage::FileDirectory;
use crate::utils::Result;

/// Serving side of the transfer protocol.
///
/// One handler task per accepted connection: read a `file_request` line,
/// answer with a `file_data` header and the raw bytes, or an error header for
/// unknown hashes. End-of-stream is signalled by closing the connection.
pub struct Uploader {
    directory: Arc<Mutex<FileDirectory>>,
    block_size: usize,
    io_timeout: Duration,
}

impl Uploader {
    pub fn new(
        directory: Arc<Mutex<FileDirectory>>,
        block_size: usize,
        io_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            block_size,
            io_timeout,
        }
    }

    /// Accept loop. Handlers run to completion even after shutdown flips; only
    /// the acceptance of new connections stops.
    pub fn spawn_accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        debug!("Transfer accept loop shutting down");
                        break;
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                debug!("Transfer connection from {}", addr);
                                let uploader = self.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = uploader.handle_connection(stream, addr).await {
                                        warn!("Transfer to {} failed: {}", addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept transfer connection: {}", e);
                                sleep(Duration::from_secs(1)).await;
                            }
                        }
                    }
                }
            }
        })
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let mut stream = BufReader::new(stream);

        let mut line = String::new();
        match timeout(self.io_timeout, stream.read_line(&mut line)).await {
            Ok(Ok(0)) => return Ok(()), // closed without a request
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                debug!("Request from {} timed out", addr);
                return Ok(());
            }
        }

        let file_hash = match serde_json::from_str::<TransferMessage>(line.trim_end()) {
            Ok(TransferMessage::FileRequest { file_hash }) => file_hash,
            Ok(other) => {
                warn!("Unexpected transfer request from {}: {:?}", addr, other);
                return Ok(());
            }
            Err(e) => {
                warn!("Unreadable transfer request from {}: {}", addr, e);
                return Ok(());
            }
        };

        let holding = { self.directory.lock().await.local_holding(&file_hash) };
        let holding = match holding {
            Some(holding) => holding,
            None => {
                debug!("{} asked for unknown file {}", addr, file_hash);
                let reply = TransferMessage::Error {
                    message: "File not found".to_string(),
                };
                stream.get_mut().write_all(&reply.to_line()?).await?;
                return Ok(());
            }
        };

        info!("Sending file {} ({}) to {}", holding.name, file_hash, addr);
        stream
            .get_mut()
            .write_all(&TransferMessage::FileData.to_line()?)
            .await?;

        let mut file = tokio::fs::File::open(&holding.path).await?;
        let mut buf = vec![0u8; self.block_size];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            stream.get_mut().write_all(&buf[..n]).await?;
        }
        stream.get_mut().flush().await?;

        debug!("Finished sending {} to {}", file_hash, addr);
        Ok(())
    }
}
