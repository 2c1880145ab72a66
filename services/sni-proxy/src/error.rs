//! Error types for route configuration, dialing, and connection handling.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors produced while parsing a single route string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteParseError {
    /// The text after the last `@` is not `host:port`.
    #[error("invalid SOCKS proxy address '{address}': {reason}")]
    InvalidProxyAddress { address: String, reason: AddrError },

    /// `hostname:port` without `=`; targets must be given with `=`.
    #[error("invalid route format '{route}': use hostname=:port or hostname")]
    LegacyFormat { route: String },

    /// The hostname part is empty.
    #[error("empty hostname")]
    EmptyHostname,

    /// `hostname=` with nothing after the `=`.
    #[error("target required when using '=' syntax")]
    EmptyTarget,

    /// `hostname=:port` where port is not an integer.
    #[error("invalid port '{port}'")]
    InvalidPort { port: String },

    /// `hostname=target` where target is not `host:port`.
    #[error("invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: AddrError },
}

/// Errors produced while building the route table.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteTableError {
    /// Two routes share the same hostname.
    #[error("duplicate route for host: {hostname}")]
    DuplicateRoute { hostname: String },

    /// A route string failed to parse.
    #[error("invalid route '{route}': {source}")]
    Parse {
        route: String,
        #[source]
        source: RouteParseError,
    },
}

/// Syntax errors for `host:port` strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddrError {
    #[error("missing port in address")]
    MissingPort,

    #[error("too many colons in address")]
    TooManyColons,

    #[error("missing ']' in address")]
    MissingBracket,

    #[error("unexpected '[' or ']' in address")]
    UnexpectedBracket,
}

/// Errors produced when constructing a [`Dialer`](crate::proxy::Dialer).
#[derive(Debug, Error)]
pub enum DialerError {
    /// The proxy address is not `host:port`.
    #[error("invalid SOCKS proxy address '{address}': {reason}")]
    InvalidAddress { address: String, reason: AddrError },

    /// The SOCKS5 dialer could not be set up for the address.
    #[error("failed to create SOCKS5 dialer for '{address}': {reason}")]
    ProxyInit { address: String, reason: String },
}

/// Errors produced while dialing a backend.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("dial to {destination} timed out after {timeout:?}")]
    Timeout {
        destination: String,
        timeout: Duration,
    },

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("SOCKS5 CONNECT to {destination} via {proxy} failed: {source}")]
    Socks5 {
        proxy: String,
        destination: String,
        #[source]
        source: tokio_socks::Error,
    },

    #[error("invalid destination '{destination}': {reason}")]
    InvalidDestination { destination: String, reason: String },
}

/// Failures while reading the TLS record that carries the ClientHello.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("timed out reading ClientHello after {0:?}")]
    Timeout(Duration),

    #[error("connection closed while reading TLS record {0}")]
    ShortRead(&'static str),

    #[error("failed to read TLS record {stage}: {source}")]
    Io {
        stage: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Per-connection failures. None of these are fatal to the process.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("failed to extract SNI")]
    SniAbsent,

    #[error("rejected connection to unconfigured host: {hostname}")]
    RouteNotFound { hostname: String },

    #[error("failed to reach backend {backend}: {reason}")]
    Dial { backend: String, reason: String },

    #[error("relay I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// Short reason label for log lines.
    pub fn reason(&self) -> &'static str {
        match self {
            ConnectionError::Framing(_) => "framing_error",
            ConnectionError::SniAbsent => "sni_absent",
            ConnectionError::RouteNotFound { .. } => "route_not_found",
            ConnectionError::Dial { .. } => "dial_error",
            ConnectionError::Io(_) => "io_error",
        }
    }
}
