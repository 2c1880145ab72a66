//! SNI-routed TLS passthrough proxy.
//!
//! This module provides:
//! - TCP listener and per-connection handling
//! - SNI extraction from the ClientHello record
//! - Hostname route table (allowlist)
//! - Direct and SOCKS5-tunneled backend dialing
//! - ClientHello replay and bidirectional relay
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> SNI Extractor -> Route Table -> Dialer -> Backend
//!                                                          |
//!                                              (optional SOCKS5 tunnel)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use proxy::{Listener, ListenerConfig, RouteTable};
//!
//! let route_table = Arc::new(RouteTable::parse_all(["a.test=:9001"])?);
//! let listener = Listener::bind(ListenerConfig::new("0.0.0.0:443"), route_table).await?;
//! Arc::new(listener).run().await?;
//! ```

mod addr;
mod dialer;
mod listener;
mod relay;
mod router;
mod sni;

pub use addr::split_host_port;
pub use dialer::{BackendIo, BackendStream, Dialer, DEFAULT_DIAL_TIMEOUT};
pub use listener::{Listener, ListenerConfig, ListenerStats};
pub use relay::{relay, Direction, RelayOutcome, ReplayReader};
pub use router::{RouteDescriptor, RouteMode, RouteTable, SharedRouteTable, PASSTHROUGH_PORT};
pub use sni::{extract_sni, read_client_hello, DEFAULT_HELLO_TIMEOUT, TLS_RECORD_HEADER_LEN};
