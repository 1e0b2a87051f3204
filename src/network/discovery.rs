use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::core::{AddressBook, Config, DiscoveryMessage, PeerAddr};
use crate::storage::FileDirectory;
use crate::utils::net::reusable_udp_socket;
use crate::utils::{LogThrottle, Result, ShareError};

const BROADCAST_HOST: &str = "255.255.255.255";

// Largest payload a UDP datagram can carry; a hello-response listing many
// holdings can far exceed a small fixed buffer.
const MAX_DATAGRAM: usize = 65_507;

/// UDP gossip endpoint.
///
/// Answers hellos with our holdings, ingests announcements into the directory,
/// and keeps the address book fresh. One instance drives both background
/// loops: the inbound dispatcher and the periodic self-announce timer.
pub struct Discovery {
    socket: Arc<UdpSocket>,
    self_addr: PeerAddr,
    bootstrap_nodes: Vec<PeerAddr>,
    enable_broadcast: bool,
    liveness_threshold: Duration,
    announce_interval: Duration,
    address_book: Arc<RwLock<AddressBook>>,
    directory: Arc<Mutex<FileDirectory>>,
    throttle: LogThrottle,
}

impl Discovery {
    /// Bind the discovery socket and wire up the shared stores.
    pub async fn bind(
        config: &Config,
        address_book: Arc<RwLock<AddressBook>>,
        directory: Arc<Mutex<FileDirectory>>,
    ) -> Result<Self> {
        let bind_addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| ShareError::Config(format!("Invalid discovery address: {}", e)))?;

        let socket = reusable_udp_socket(bind_addr)?;
        socket
            .set_broadcast(true)
            .map_err(|e| ShareError::Network(format!("Failed to enable broadcast: {}", e)))?;
        info!("Discovery listening on {}", bind_addr);

        Ok(Self {
            socket: Arc::new(socket),
            self_addr: config.self_addr(),
            bootstrap_nodes: config.bootstrap_nodes.clone(),
            enable_broadcast: config.enable_broadcast,
            liveness_threshold: config.liveness_threshold(),
            announce_interval: config.announce_interval(),
            address_book,
            directory,
            throttle: LogThrottle::new(Duration::from_secs(10)),
        })
    }

    /// Inbound loop: receive, dispatch, then evict anything stale. Exits when
    /// the shutdown channel flips.
    pub fn spawn_inbound_loop(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        debug!("Discovery loop shutting down");
                        break;
                    }
                    received = self.socket.recv_from(&mut buf) => {
                        match received {
                            Ok((len, src)) => {
                                self.handle_datagram(&buf[..len], src).await;
                                self.sweep_expired().await;
                            }
                            Err(e) => {
                                if *shutdown.borrow() {
                                    break;
                                }
                                if self.throttle.should_log("discovery-recv") {
                                    warn!("Discovery receive error: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    /// Periodic self-announce: hello the bootstrap list and the broadcast
    /// address, once immediately and then on every tick.
    pub fn spawn_announce_loop(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.announce_interval);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => self.greet_network().await,
                }
            }
        })
    }

    /// Send `hello` to every bootstrap node and to the local broadcast
    /// address. This is the only mechanism that reaches previously-unknown
    /// peers; everything else in the protocol talks to addresses already
    /// learned here.
    pub async fn greet_network(&self) {
        let hello = DiscoveryMessage::Hello {
            host: self.self_addr.host.clone(),
            port: self.self_addr.port,
        };
        for node in &self.bootstrap_nodes {
            self.send_to(&hello, node).await;
        }
        if self.enable_broadcast {
            self.send_broadcast(&hello).await;
        }
    }

    /// Advertise a newly held file to every known peer, plus any bootstrap
    /// node we have not heard from, so seed nodes learn of content even if
    /// they never answered a hello.
    pub async fn announce_file(&self, file_hash: &str, file_name: &str) {
        let message = DiscoveryMessage::AnnounceFile {
            file_hash: file_hash.to_string(),
            file_name: file_name.to_string(),
            host: self.self_addr.host.clone(),
            port: self.self_addr.port,
        };
        let peers = self.address_book.read().await.addrs();
        for peer in &peers {
            self.send_to(&message, peer).await;
        }
        for node in &self.bootstrap_nodes {
            if !peers.contains(node) {
                self.send_to(&message, node).await;
            }
        }
    }

    /// Tell every known peer we are leaving.
    pub async fn broadcast_goodbye(&self) {
        let peers = self.address_book.read().await.addrs();
        for peer in &peers {
            self.send_to(&DiscoveryMessage::Goodbye, peer).await;
            info!("Sent goodbye to {}", peer);
        }
    }

    /// Drop a peer from the address book and strip it from the file catalog.
    /// Both stores are updated in the same pass so candidate lists never hand
    /// out an address the book no longer tracks.
    pub async fn evict(&self, peer: &PeerAddr) {
        self.address_book.write().await.remove(peer);
        self.directory.lock().await.drop_peer(peer);
    }

    async fn sweep_expired(&self) {
        let stale = self
            .address_book
            .read()
            .await
            .expired(self.liveness_threshold);
        for peer in stale {
            info!("Peer {} timed out, evicting", peer);
            self.evict(&peer).await;
        }
    }

    async fn handle_datagram(&self, data: &[u8], src: SocketAddr) {
        let message: DiscoveryMessage = match serde_json::from_slice(data) {
            Ok(message) => message,
            Err(e) => {
                if self.throttle.should_log("malformed-datagram") {
                    warn!("Dropping malformed datagram from {}: {}", src, e);
                }
                return;
            }
        };

        match message {
            DiscoveryMessage::Hello { host, port } => {
                let sender = PeerAddr::new(host, port);
                if sender == self.self_addr {
                    return; // our own broadcast looping back
                }
                self.address_book.write().await.touch(sender.clone());
                info!("New peer discovered: {}", sender);

                let files = self.directory.lock().await.local_files();
                let response = DiscoveryMessage::HelloResponse {
                    host: self.self_addr.host.clone(),
                    port: self.self_addr.port,
                    files,
                };
                self.send_to(&response, &sender).await;
            }
            DiscoveryMessage::HelloResponse { host, port, files } => {
                let sender = PeerAddr::new(host, port);
                if sender == self.self_addr {
                    return;
                }
                self.address_book.write().await.touch(sender.clone());
                debug!("Hello response from {} listing {} files", sender, files.len());

                let mut directory = self.directory.lock().await;
                for (hash, name) in files {
                    directory.record_remote(&hash, &name, sender.clone());
                }
            }
            DiscoveryMessage::AnnounceFile {
                file_hash,
                file_name,
                host,
                port,
            } => {
                let sender = PeerAddr::new(host, port);
                if sender == self.self_addr {
                    return;
                }
                // Announcements are taken on faith even from addresses that
                // never said hello; the address book stays untouched.
                self.directory
                    .lock()
                    .await
                    .record_remote(&file_hash, &file_name, sender.clone());
                info!("{} announced {} ({})", sender, file_name, file_hash);
            }
            DiscoveryMessage::Goodbye => {
                // Goodbye declares no address; the UDP source (the peer's
                // discovery socket) is the only identity it has.
                let sender = PeerAddr::new(src.ip().to_string(), src.port());
                self.evict(&sender).await;
                info!("Peer {} left the network", sender);
            }
        }
    }

    async fn send_to(&self, message: &DiscoveryMessage, peer: &PeerAddr) {
        match serde_json::to_vec(message) {
            Ok(data) => {
                if let Err(e) = self.socket.send_to(&data, peer.discovery_endpoint()).await {
                    warn!("Failed to send to {}: {}", peer, e);
                }
            }
            Err(e) => error!("Failed to encode discovery message: {}", e),
        }
    }

    async fn send_broadcast(&self, message: &DiscoveryMessage) {
        match serde_json::to_vec(message) {
            Ok(data) => {
                let target = (BROADCAST_HOST, self.self_addr.port);
                if let Err(e) = self.socket.send_to(&data, target).await {
                    if self.throttle.should_log("broadcast-send") {
                        warn!("Broadcast send failed: {}", e);
                    }
                }
            }
            Err(e) => error!("Failed to encode discovery message: {}", e),
        }
    }
}
