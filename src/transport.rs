//! UDP transport layer for HSE communication.
//!
//! This module provides the [`DatagramSocket`] trait, the boundary between the
//! session and the network, and [`UdpTransport`], its tokio implementation.
//! The transport layer only knows about sockets and bytes; it has no
//! knowledge of the protocol.
//!
//! # Constants
//!
//! - [`DEFAULT_HSE_PORT`] - Default High Speed Ethernet Server port (10040)
//! - [`DEFAULT_TIMEOUT`] - Default connect timeout (2 seconds)
//!
//! # Example
//!
//! The transport is typically created through
//! [`Client::connect`](crate::Client::connect), but can be used directly:
//!
//! ```no_run
//! use yaskawa_hse::{DatagramSocket, UdpTransport, DEFAULT_HSE_PORT};
//! use std::time::Duration;
//!
//! # async fn example() -> yaskawa_hse::Result<()> {
//! let transport = UdpTransport::connect("10.0.0.2", DEFAULT_HSE_PORT, Duration::from_secs(2)).await?;
//! transport.send(b"YERC...").await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};
use tracing::debug;

use crate::error::{HseError, Result};

/// Default High Speed Ethernet Server UDP port.
pub const DEFAULT_HSE_PORT: u16 = 10040;

/// Default timeout for connecting.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// A connected, connectionless datagram socket.
///
/// A [`Client`](crate::Client) keeps at most one `recv` outstanding at any time.
/// Closing is handled by the client: once closed, an in-flight `recv` is
/// abandoned and never polled again.
pub trait DatagramSocket: Send + Sync + 'static {
    /// Receives one datagram into `buffer`, returning its size.
    fn recv(&self, buffer: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Sends one datagram.
    fn send(&self, datagram: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

/// UDP transport for HSE communication.
pub struct UdpTransport {
    socket: UdpSocket,
    remote_addr: SocketAddr,
}

impl UdpTransport {
    /// Resolves `host` and connects a UDP socket to it within `timeout`.
    ///
    /// Every resolved address is tried in order until one can be connected.
    ///
    /// # Errors
    ///
    /// Returns `HseError::Timeout` if resolving and connecting take longer than
    /// `timeout`, or `HseError::Transport` if no address could be connected.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        tokio::time::timeout(timeout, Self::resolve_connect(host, port))
            .await
            .map_err(|_| HseError::timeout(format!("connection to {host}:{port}")))?
    }

    /// Wraps an already connected tokio socket.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket is not connected.
    pub fn from_socket(socket: UdpSocket) -> Result<Self> {
        let remote_addr = socket.peer_addr()?;
        Ok(Self {
            socket,
            remote_addr,
        })
    }

    async fn resolve_connect(host: &str, port: u16) -> Result<Self> {
        let mut last_error = None;
        for addr in lookup_host((host, port)).await? {
            debug!(%addr, "connecting");
            match Self::connect_addr(addr).await {
                Ok(socket) => return Self::from_socket(socket),
                Err(error) => {
                    debug!(%addr, %error, "connect failed");
                    last_error = Some(error);
                }
            }
        }

        Err(match last_error {
            Some(error) => HseError::Transport(error),
            None => HseError::invalid_parameter(
                "host",
                format!("{host} did not resolve to any address"),
            ),
        })
    }

    async fn connect_addr(addr: SocketAddr) -> io::Result<UdpSocket> {
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(addr).await?;
        Ok(socket)
    }

    /// Returns the remote controller address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

impl DatagramSocket for UdpTransport {
    async fn recv(&self, buffer: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buffer).await
    }

    async fn send(&self, datagram: &[u8]) -> io::Result<usize> {
        self.socket.send(datagram).await
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("remote_addr", &self.remote_addr)
            .field("local_addr", &self.socket.local_addr().ok())
            .finish()
    }
}
