//! Accept loop and per-connection pipeline.
//!
//! This module accepts connections, reads the TLS ClientHello record,
//! routes on its SNI hostname and relays the connection to the backend.
//!
//! Per connection:
//! - Read one TLS record within the hello timeout, buffering it for replay
//! - Reject (close, no response) on framing errors, absent SNI or no route
//! - Dial the backend directly or through the route's SOCKS5 proxy
//! - Replay the buffered record, then relay both directions until one ends
//!
//! There is no admission control: every accepted connection gets a task.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn, Instrument};

use crate::error::ConnectionError;

use super::dialer::{Dialer, DEFAULT_DIAL_TIMEOUT};
use super::relay::relay;
use super::router::SharedRouteTable;
use super::sni::{extract_sni, read_client_hello, DEFAULT_HELLO_TIMEOUT};

/// Pause after an accept error before accepting again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Bind address and per-connection deadlines.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// `host:port` to bind.
    pub bind_addr: String,
    /// Deadline for reading the ClientHello record.
    pub hello_timeout: Duration,
    /// Timeout for connecting to the backend (or proxy).
    pub dial_timeout: Duration,
}

impl ListenerConfig {
    /// Config with the default hello and dial timeouts.
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            hello_timeout: DEFAULT_HELLO_TIMEOUT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

/// Connection counters, updated with relaxed atomics.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Connections accepted.
    pub connections_accepted: AtomicU64,
    /// Connections still being handled.
    pub connections_active: AtomicU64,
    /// Connections finished, for any reason.
    pub connections_closed: AtomicU64,
    /// SNI extraction failures (framing errors, absent SNI).
    pub sni_failed: AtomicU64,
    /// Hostnames with no configured route.
    pub routes_failed: AtomicU64,
    /// Backends dialed successfully.
    pub backend_connected: AtomicU64,
    /// Dial failures, including dialer construction.
    pub backend_failed: AtomicU64,
    /// Bytes relayed to backends, including replayed ClientHello bytes.
    pub bytes_to_backend: AtomicU64,
    /// Bytes relayed from backends.
    pub bytes_from_backend: AtomicU64,
}

impl ListenerStats {
    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A TCP listener for the SNI proxy.
pub struct Listener {
    config: ListenerConfig,
    listener: TcpListener,
    route_table: SharedRouteTable,
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Bind the listening socket.
    pub async fn bind(config: ListenerConfig, route_table: SharedRouteTable) -> io::Result<Self> {
        let listener = match TcpListener::bind(&config.bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                let Some(fallback) = ipv4_fallback(&config.bind_addr) else {
                    return Err(e);
                };
                warn!(
                    bind_addr = %config.bind_addr,
                    fallback = %fallback,
                    error = %e,
                    "IPv6 wildcard bind failed, listening on IPv4 only"
                );
                TcpListener::bind(&fallback).await?
            }
        };
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            route_count = route_table.len(),
            "Listener bound"
        );

        Ok(Self {
            listener,
            config,
            route_table,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Address actually bound, with the real port when `:0` was requested.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Accept forever. Each connection is handled on its own task.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    ListenerStats::incr(&self.stats.connections_accepted);
                    ListenerStats::incr(&self.stats.connections_active);

                    let listener = Arc::clone(&self);

                    tokio::spawn(
                        async move {
                            if let Err(e) = listener.handle_connection(stream).await {
                                warn!(reason = e.reason(), error = %e, "Connection dropped");
                            }

                            let stats = &listener.stats;
                            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                            ListenerStats::incr(&stats.connections_closed);
                        }
                        .instrument(tracing::info_span!("connection", peer = %peer_addr)),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Handle a single connection. The client socket is closed on return.
    async fn handle_connection(&self, mut client: TcpStream) -> Result<(), ConnectionError> {
        let stats = &self.stats;

        let prefix = match read_client_hello(&mut client, self.config.hello_timeout).await {
            Ok(prefix) => prefix,
            Err(e) => {
                ListenerStats::incr(&stats.sni_failed);
                return Err(e.into());
            }
        };

        let hostname = match extract_sni(&prefix) {
            Some(hostname) if !hostname.is_empty() => hostname,
            _ => {
                ListenerStats::incr(&stats.sni_failed);
                return Err(ConnectionError::SniAbsent);
            }
        };

        let Some(route) = self.route_table.lookup(&hostname) else {
            ListenerStats::incr(&stats.routes_failed);
            return Err(ConnectionError::RouteNotFound { hostname });
        };

        let backend_addr = route.backend_addr();
        info!(
            hostname = %hostname,
            backend = %backend_addr,
            route = route.kind(),
            proxy = route.proxy.as_deref().unwrap_or("-"),
            "Routing connection"
        );

        let backend = match Dialer::new(route.proxy.as_deref(), self.config.dial_timeout) {
            Ok(dialer) => dialer.dial(&backend_addr).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let backend = match backend {
            Ok(backend) => {
                ListenerStats::incr(&stats.backend_connected);
                backend
            }
            Err(reason) => {
                ListenerStats::incr(&stats.backend_failed);
                return Err(ConnectionError::Dial {
                    backend: backend_addr,
                    reason,
                });
            }
        };

        let outcome = relay(client, prefix, backend).await;

        stats
            .bytes_to_backend
            .fetch_add(outcome.bytes_to_backend, Ordering::Relaxed);
        stats
            .bytes_from_backend
            .fetch_add(outcome.bytes_from_backend, Ordering::Relaxed);

        debug!(
            hostname = %hostname,
            backend = %backend_addr,
            first_closed = %outcome.first_closed,
            bytes_to_backend = outcome.bytes_to_backend,
            bytes_from_backend = outcome.bytes_from_backend,
            "Connection closed"
        );

        match outcome.error {
            Some(e) => Err(ConnectionError::Io(e)),
            None => Ok(()),
        }
    }
}

/// `0.0.0.0:port` for a `[::]:port` wildcard, for hosts without IPv6.
fn ipv4_fallback(bind_addr: &str) -> Option<String> {
    bind_addr
        .strip_prefix("[::]:")
        .map(|port| format!("0.0.0.0:{}", port))
}
