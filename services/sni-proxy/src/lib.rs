pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;

pub use config::{Cli, Config};
pub use error::{ConnectionError, DialError, DialerError, RouteParseError, RouteTableError};
pub use proxy::{
    extract_sni, Dialer, Listener, ListenerConfig, ListenerStats, RouteDescriptor, RouteMode,
    RouteTable, SharedRouteTable,
};
