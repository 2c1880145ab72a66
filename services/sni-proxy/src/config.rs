//! Proxy configuration.
//!
//! Command-line flags (with environment fallbacks) are parsed once into an
//! immutable [`Config`], which builds the route table and listener config.

use clap::Parser;

use crate::error::RouteTableError;
use crate::proxy::{ListenerConfig, RouteTable};

/// Default listen address: all interfaces, port 443.
pub const DEFAULT_LISTEN: &str = ":443";

/// SNI-routed TLS passthrough proxy.
#[derive(Debug, Clone, Parser)]
#[command(name = "sni-proxy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Listen address (`host:port`, or `:port` for all IPv6 and IPv4 interfaces).
    #[arg(long, env = "SNI_PROXY_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: String,

    /// SNI route mapping, repeatable.
    ///
    /// Formats: `hostname[@proxy]` (passthrough to hostname:443),
    /// `hostname=host:port[@proxy]` or `hostname=:port[@proxy]` (routed).
    #[arg(long = "route", env = "SNI_PROXY_ROUTES", value_delimiter = ',')]
    pub routes: Vec<String>,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, env = "SNI_PROXY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON instead of plain text.
    #[arg(long, env = "SNI_PROXY_LOG_JSON")]
    pub log_json: bool,
}

/// Proxy configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the listener binds to, already normalized.
    pub listen: String,
    /// Route strings as given on input.
    pub routes: Vec<String>,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Emit JSON logs.
    pub log_json: bool,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Self {
            listen: normalize_listen_addr(&cli.listen),
            routes: cli.routes,
            log_level: cli.log_level,
            log_json: cli.log_json,
        }
    }
}

impl Config {
    /// Parse the process arguments.
    pub fn from_args() -> Self {
        Cli::parse().into()
    }

    /// Build the route table. Any malformed or duplicate route fails.
    pub fn route_table(&self) -> Result<RouteTable, RouteTableError> {
        RouteTable::parse_all(&self.routes)
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig::new(self.listen.clone())
    }
}

/// Expand `:port` to the dual-stack wildcard `[::]:port`; other addresses
/// pass through. The listener falls back to `0.0.0.0:port` without IPv6.
pub fn normalize_listen_addr(listen: &str) -> String {
    let listen = listen.trim();
    if listen.starts_with(':') {
        format!("[::]{}", listen)
    } else {
        listen.to_string()
    }
}
