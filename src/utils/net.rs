use log::warn;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::UdpSocket;

use crate::utils::{Result, ShareError};

/// Create a UDP socket with SO_REUSEADDR (and SO_REUSEPORT on Unix where
/// available), so a node can restart on the same discovery port immediately.
pub fn reusable_udp_socket(addr: SocketAddr) -> Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| ShareError::Network(format!("Failed to create socket: {}", e)))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| ShareError::Network(format!("Failed to set reuse_address: {}", e)))?;

    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    {
        if let Err(e) = socket.set_reuse_port(true) {
            warn!("Could not set SO_REUSEPORT (not critical): {}", e);
        }
    }

    socket
        .bind(&addr.into())
        .map_err(|e| ShareError::Network(format!("Failed to bind to {}: {}", addr, e)))?;

    socket
        .set_nonblocking(true)
        .map_err(|e| ShareError::Network(format!("Failed to set nonblocking: {}", e)))?;

    UdpSocket::from_std(socket.into())
        .map_err(|e| ShareError::Network(format!("Failed to register socket: {}", e)))
}
