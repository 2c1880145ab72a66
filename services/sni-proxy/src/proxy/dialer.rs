//! Backend dialing, direct or through a SOCKS5 tunnel.
//!
//! A [`Dialer`] is created per connection attempt from the route's proxy
//! setting and discarded afterwards. Nothing is opened until [`Dialer::dial`]
//! is called, and tunnels are never pooled or reused.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;

use crate::error::{DialError, DialerError};

use super::addr::{parse_port, split_host_port};

/// Connect timeout for backend and proxy connections.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// A duplex byte stream to a backend.
pub trait BackendIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> BackendIo for T {}

/// Connected backend stream, either plain TCP or a SOCKS5 tunnel.
pub type BackendStream = Box<dyn BackendIo>;

/// Opens connections to arbitrary `host:port` destinations.
#[derive(Debug, Clone)]
pub enum Dialer {
    /// Plain TCP connection to the destination.
    Direct { timeout: Duration },
    /// Unauthenticated SOCKS5 CONNECT through `proxy`.
    Socks5 { proxy: String, timeout: Duration },
}

impl Dialer {
    /// Create a dialer for an optional proxy address.
    ///
    /// An empty or absent proxy yields a direct dialer.
    pub fn new(proxy: Option<&str>, timeout: Duration) -> Result<Self, DialerError> {
        let proxy = match proxy.map(str::trim) {
            None | Some("") => return Ok(Dialer::Direct { timeout }),
            Some(proxy) => proxy,
        };

        let (_, port) =
            split_host_port(proxy).map_err(|reason| DialerError::InvalidAddress {
                address: proxy.to_string(),
                reason,
            })?;
        if parse_port(port).is_none() {
            return Err(DialerError::ProxyInit {
                address: proxy.to_string(),
                reason: format!("unsupported proxy port '{}'", port),
            });
        }

        Ok(Dialer::Socks5 {
            proxy: proxy.to_string(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        match self {
            Dialer::Direct { timeout } | Dialer::Socks5 { timeout, .. } => *timeout,
        }
    }

    /// Proxy address, if this dialer tunnels.
    pub fn proxy(&self) -> Option<&str> {
        match self {
            Dialer::Direct { .. } => None,
            Dialer::Socks5 { proxy, .. } => Some(proxy),
        }
    }

    /// Connect to `destination` (`host:port`) within the dial timeout.
    pub async fn dial(&self, destination: &str) -> Result<BackendStream, DialError> {
        let limit = self.timeout();
        let attempt = async {
            match self {
                Dialer::Direct { .. } => dial_direct(destination).await,
                Dialer::Socks5 { proxy, .. } => dial_socks5(proxy, destination).await,
            }
        };

        match timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => Err(DialError::Timeout {
                destination: destination.to_string(),
                timeout: limit,
            }),
        }
    }
}

async fn dial_direct(destination: &str) -> Result<BackendStream, DialError> {
    let stream = TcpStream::connect(destination)
        .await
        .map_err(|source| DialError::Connect {
            address: destination.to_string(),
            source,
        })?;
    stream.set_nodelay(true).ok();

    debug!(backend = %destination, "Connected directly");
    Ok(Box::new(stream))
}

async fn dial_socks5(proxy: &str, destination: &str) -> Result<BackendStream, DialError> {
    let invalid = |reason: String| DialError::InvalidDestination {
        destination: destination.to_string(),
        reason,
    };
    let (host, port) = split_host_port(destination).map_err(|e| invalid(e.to_string()))?;
    let port = parse_port(port).ok_or_else(|| invalid(format!("invalid port '{}'", port)))?;

    let socket = TcpStream::connect(proxy)
        .await
        .map_err(|source| DialError::Connect {
            address: proxy.to_string(),
            source,
        })?;
    socket.set_nodelay(true).ok();

    let stream = Socks5Stream::connect_with_socket(socket, (host, port))
        .await
        .map_err(|source| DialError::Socks5 {
            proxy: proxy.to_string(),
            destination: destination.to_string(),
            source,
        })?;

    debug!(backend = %destination, proxy = %proxy, "Connected through SOCKS5");
    Ok(Box::new(stream))
}
