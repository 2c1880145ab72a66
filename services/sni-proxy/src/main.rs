//! sni-proxy
//!
//! L4 proxy with TLS passthrough and SNI routing.
//!
//! This service:
//! - Accepts TCP connections on the listen address
//! - Inspects the TLS ClientHello for the SNI hostname
//! - Rejects hostnames without a configured route
//! - Proxies allowed connections to their backend, directly or via SOCKS5

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use sni_proxy::logging::init_tracing;
use sni_proxy::{Config, Listener};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_args();

    init_tracing(&config.log_level, config.log_json);

    let route_table = config
        .route_table()
        .context("Failed to parse routes")?;

    info!(listen = %config.listen, "Starting SNI proxy");
    if route_table.is_empty() {
        warn!("No routes configured - all connections will be rejected");
    } else {
        info!(route_count = route_table.len(), "Configured routes");
        for route in route_table.iter() {
            info!("  {}", route);
        }
    }

    let listener = Listener::bind(config.listener_config(), Arc::new(route_table))
        .await
        .with_context(|| format!("Failed to bind listener on {}", config.listen))?;

    Arc::new(listener).run().await.context("Listener error")
}
