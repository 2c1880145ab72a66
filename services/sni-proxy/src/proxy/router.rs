//! Route descriptors and the route table.
//!
//! Routes are an allowlist: a connection is only proxied when its SNI
//! hostname matches a configured route.
//!
//! - Exact hostname match only (no wildcards)
//! - Hostnames normalized to lowercase, one trailing dot trimmed
//! - The table is built once and never mutated, so lookups need no locking
//!
//! Route string grammar:
//!
//! ```text
//! hostname[@proxyhost:proxyport]                  passthrough to hostname:443
//! hostname=host:port[@proxyhost:proxyport]        routed to host:port
//! hostname=:port[@proxyhost:proxyport]            routed to localhost:port
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{RouteParseError, RouteTableError};

use super::addr::split_host_port;

/// Port used to reach the SNI hostname itself for passthrough routes.
pub const PASSTHROUGH_PORT: u16 = 443;

/// How the backend address for a route is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMode {
    /// Connect to `hostname:443`.
    Passthrough,
    /// Connect to an explicitly configured `host:port`.
    Routed { target: String },
}

/// A single configured route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    pub hostname: String,
    pub mode: RouteMode,
    /// SOCKS5 proxy (`host:port`) used to reach the backend, if any.
    pub proxy: Option<String>,
}

impl RouteDescriptor {
    /// Normalize a hostname for matching.
    ///
    /// - Convert to lowercase
    /// - Trim a single trailing dot
    pub fn normalize_hostname(hostname: &str) -> String {
        let lower = hostname.to_lowercase();
        match lower.strip_suffix('.') {
            Some(stripped) => stripped.to_string(),
            None => lower,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.mode == RouteMode::Passthrough
    }

    /// Configured target for routed routes.
    pub fn target(&self) -> Option<&str> {
        match &self.mode {
            RouteMode::Passthrough => None,
            RouteMode::Routed { target } => Some(target),
        }
    }

    /// Address the proxy dials for this route.
    pub fn backend_addr(&self) -> String {
        match &self.mode {
            RouteMode::Passthrough => format!("{}:{}", self.hostname, PASSTHROUGH_PORT),
            RouteMode::Routed { target } => target.clone(),
        }
    }

    /// `passthrough` or `routed`, for log lines.
    pub fn kind(&self) -> &'static str {
        match self.mode {
            RouteMode::Passthrough => "passthrough",
            RouteMode::Routed { .. } => "routed",
        }
    }
}

impl fmt::Display for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({})",
            self.hostname,
            self.backend_addr(),
            self.kind()
        )?;
        if let Some(proxy) = &self.proxy {
            write!(f, " via SOCKS5 {}", proxy)?;
        }
        Ok(())
    }
}

impl FromStr for RouteDescriptor {
    type Err = RouteParseError;

    fn from_str(route: &str) -> Result<Self, Self::Err> {
        let mut proxy = None;
        let mut remainder = route;

        // Proxy suffix follows the last '@'.
        if let Some(idx) = route.rfind('@') {
            let proxy_addr = route[idx + 1..].trim();
            remainder = route[..idx].trim();

            if !proxy_addr.is_empty() {
                split_host_port(proxy_addr).map_err(|reason| {
                    RouteParseError::InvalidProxyAddress {
                        address: proxy_addr.to_string(),
                        reason,
                    }
                })?;
                proxy = Some(proxy_addr.to_string());
            }
        }

        let Some((host, target)) = remainder.split_once('=') else {
            if remainder.contains(':') {
                return Err(RouteParseError::LegacyFormat {
                    route: route.to_string(),
                });
            }
            let host = remainder.trim();
            if RouteDescriptor::normalize_hostname(host).is_empty() {
                return Err(RouteParseError::EmptyHostname);
            }
            return Ok(Self {
                hostname: host.to_string(),
                mode: RouteMode::Passthrough,
                proxy,
            });
        };

        let host = host.trim();
        let target = target.trim();

        if RouteDescriptor::normalize_hostname(host).is_empty() {
            return Err(RouteParseError::EmptyHostname);
        }
        if target.is_empty() {
            return Err(RouteParseError::EmptyTarget);
        }

        let target = if let Some(port) = target.strip_prefix(':') {
            if port.parse::<u16>().is_err() {
                return Err(RouteParseError::InvalidPort {
                    port: port.to_string(),
                });
            }
            format!("localhost:{}", port)
        } else {
            split_host_port(target).map_err(|reason| RouteParseError::InvalidTarget {
                target: target.to_string(),
                reason,
            })?;
            target.to_string()
        };

        Ok(Self {
            hostname: host.to_string(),
            mode: RouteMode::Routed { target },
            proxy,
        })
    }
}

/// Immutable mapping from hostname to route.
#[derive(Debug, Default)]
pub struct RouteTable {
    /// Routes keyed by normalized hostname.
    by_hostname: HashMap<String, RouteDescriptor>,
}

impl RouteTable {
    /// Build a table from descriptors, rejecting duplicate hostnames.
    pub fn build(
        descriptors: impl IntoIterator<Item = RouteDescriptor>,
    ) -> Result<Self, RouteTableError> {
        let mut by_hostname = HashMap::new();

        for mut descriptor in descriptors {
            let key = RouteDescriptor::normalize_hostname(&descriptor.hostname);
            if key.is_empty() {
                return Err(RouteTableError::Parse {
                    route: descriptor.hostname,
                    source: RouteParseError::EmptyHostname,
                });
            }
            if by_hostname.contains_key(&key) {
                return Err(RouteTableError::DuplicateRoute {
                    hostname: descriptor.hostname,
                });
            }
            descriptor.hostname = key.clone();
            by_hostname.insert(key, descriptor);
        }

        Ok(Self { by_hostname })
    }

    /// Parse route strings and build a table from them.
    pub fn parse_all<I, S>(routes: I) -> Result<Self, RouteTableError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let descriptors = routes
            .into_iter()
            .map(|route| {
                let route = route.as_ref();
                route
                    .parse::<RouteDescriptor>()
                    .map_err(|source| RouteTableError::Parse {
                        route: route.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::build(descriptors)
    }

    /// Look up the route for an SNI hostname.
    pub fn lookup(&self, hostname: &str) -> Option<&RouteDescriptor> {
        self.by_hostname
            .get(&RouteDescriptor::normalize_hostname(hostname))
    }

    pub fn len(&self) -> usize {
        self.by_hostname.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hostname.is_empty()
    }

    /// Routes sorted by hostname.
    pub fn iter(&self) -> impl Iterator<Item = &RouteDescriptor> {
        let mut routes: Vec<_> = self.by_hostname.values().collect();
        routes.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        routes.into_iter()
    }
}

/// Shared route table reference.
pub type SharedRouteTable = Arc<RouteTable>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AddrError;
    use proptest::prelude::*;

    fn parse(route: &str) -> Result<RouteDescriptor, RouteParseError> {
        route.parse()
    }

    #[test]
    fn test_normalize_hostname() {
        assert_eq!(
            RouteDescriptor::normalize_hostname("Example.COM"),
            "example.com"
        );
        assert_eq!(
            RouteDescriptor::normalize_hostname("example.com."),
            "example.com"
        );
        assert_eq!(
            RouteDescriptor::normalize_hostname("example.com.."),
            "example.com."
        );
    }

    #[test]
    fn test_only_one_trailing_dot_is_ignored() {
        let table = RouteTable::parse_all(["a.test", "a.test.."]).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup("a.test.").unwrap().hostname, "a.test");
        assert_eq!(table.lookup("a.test..").unwrap().hostname, "a.test.");
    }

    #[test]
    fn test_dot_only_hostname_rejected() {
        assert_eq!(parse("."), Err(RouteParseError::EmptyHostname));
        assert_eq!(parse(".=:8080"), Err(RouteParseError::EmptyHostname));

        let descriptor = RouteDescriptor {
            hostname: ".".to_string(),
            mode: RouteMode::Passthrough,
            proxy: None,
        };
        assert!(matches!(
            RouteTable::build([descriptor]),
            Err(RouteTableError::Parse {
                source: RouteParseError::EmptyHostname,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_passthrough() {
        let route = parse("example.com").unwrap();
        assert_eq!(route.hostname, "example.com");
        assert!(route.is_passthrough());
        assert_eq!(route.target(), None);
        assert_eq!(route.proxy, None);
        assert_eq!(route.backend_addr(), "example.com:443");
    }

    #[test]
    fn test_parse_passthrough_with_proxy() {
        let route = parse("example.com@127.0.0.1:1080").unwrap();
        assert!(route.is_passthrough());
        assert_eq!(route.proxy.as_deref(), Some("127.0.0.1:1080"));
    }

    #[test]
    fn test_parse_local_port() {
        let route = parse("example.com=:8080").unwrap();
        assert_eq!(route.target(), Some("localhost:8080"));
        assert_eq!(route.proxy, None);
    }

    #[test]
    fn test_parse_routed_with_proxy() {
        let route = parse("example.com=backend.local:443@127.0.0.1:1080").unwrap();
        assert_eq!(route.hostname, "example.com");
        assert_eq!(route.target(), Some("backend.local:443"));
        assert_eq!(route.proxy.as_deref(), Some("127.0.0.1:1080"));
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let route = parse(" example.com = backend.local:443 @ 127.0.0.1:1080 ").unwrap();
        assert_eq!(route.hostname, "example.com");
        assert_eq!(route.target(), Some("backend.local:443"));
        assert_eq!(route.proxy.as_deref(), Some("127.0.0.1:1080"));
    }

    #[test]
    fn test_parse_empty_proxy_suffix_ignored() {
        let route = parse("example.com=:8080@").unwrap();
        assert_eq!(route.proxy, None);
    }

    #[test]
    fn test_parse_legacy_format_rejected() {
        assert!(matches!(
            parse("example.com:443"),
            Err(RouteParseError::LegacyFormat { .. })
        ));
    }

    #[test]
    fn test_parse_empty_target_rejected() {
        assert_eq!(parse("example.com="), Err(RouteParseError::EmptyTarget));
    }

    #[test]
    fn test_parse_empty_hostname_rejected() {
        assert_eq!(parse(""), Err(RouteParseError::EmptyHostname));
        assert_eq!(parse("=:8080"), Err(RouteParseError::EmptyHostname));
        assert_eq!(parse("@127.0.0.1:1080"), Err(RouteParseError::EmptyHostname));
    }

    #[test]
    fn test_parse_invalid_port_rejected() {
        assert_eq!(
            parse("example.com=:http"),
            Err(RouteParseError::InvalidPort {
                port: "http".to_string()
            })
        );
    }

    #[test]
    fn test_parse_invalid_target_rejected() {
        assert_eq!(
            parse("example.com=backend.local"),
            Err(RouteParseError::InvalidTarget {
                target: "backend.local".to_string(),
                reason: AddrError::MissingPort,
            })
        );
    }

    #[test]
    fn test_parse_invalid_proxy_rejected() {
        assert!(matches!(
            parse("example.com@proxy.local"),
            Err(RouteParseError::InvalidProxyAddress { .. })
        ));
    }

    #[test]
    fn test_display() {
        let route = parse("example.com=backend.local:443@127.0.0.1:1080").unwrap();
        assert_eq!(
            route.to_string(),
            "example.com -> backend.local:443 (routed) via SOCKS5 127.0.0.1:1080"
        );
        let route = parse("example.org").unwrap();
        assert_eq!(route.to_string(), "example.org -> example.org:443 (passthrough)");
    }

    #[test]
    fn test_table_lookup() {
        let table =
            RouteTable::parse_all(["a.test=:9001", "b.test", "c.test=10.0.0.1:8443@[::1]:1080"])
                .unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(
            table.lookup("a.test").unwrap().target(),
            Some("localhost:9001")
        );
        assert!(table.lookup("b.test").unwrap().is_passthrough());
        assert_eq!(
            table.lookup("c.test").unwrap().proxy.as_deref(),
            Some("[::1]:1080")
        );
        assert!(table.lookup("unknown.test").is_none());
        assert!(table.lookup("").is_none());
    }

    #[test]
    fn test_table_lookup_is_case_insensitive() {
        let table = RouteTable::parse_all(["Mixed.Example.COM"]).unwrap();
        let route = table.lookup("mixed.example.com.").unwrap();
        assert_eq!(route.backend_addr(), "mixed.example.com:443");
    }

    #[test]
    fn test_table_rejects_duplicates_in_any_order() {
        for routes in [["a.test", "a.test=:9001"], ["a.test=:9001", "a.test"]] {
            assert!(matches!(
                RouteTable::parse_all(routes),
                Err(RouteTableError::DuplicateRoute { .. })
            ));
        }
        assert!(matches!(
            RouteTable::parse_all(["a.test", "A.TEST."]),
            Err(RouteTableError::DuplicateRoute { .. })
        ));
    }

    #[test]
    fn test_table_reports_parse_errors() {
        let err = RouteTable::parse_all(["ok.test", "bad.test:443"]).unwrap_err();
        match err {
            RouteTableError::Parse { route, source } => {
                assert_eq!(route, "bad.test:443");
                assert!(matches!(source, RouteParseError::LegacyFormat { .. }));
            }
            other => panic!("Expected Parse, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_table() {
        let table = RouteTable::parse_all(Vec::<String>::new()).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.iter().count(), 0);
    }

    #[test]
    fn test_iter_sorted() {
        let table = RouteTable::parse_all(["z.test", "a.test", "m.test"]).unwrap();
        let hosts: Vec<_> = table.iter().map(|r| r.hostname.as_str()).collect();
        assert_eq!(hosts, ["a.test", "m.test", "z.test"]);
    }

    proptest! {
        #[test]
        fn prop_distinct_hostnames_build_and_resolve(
            hosts in proptest::collection::hash_set("[a-z][a-z0-9-]{0,12}(\\.[a-z]{2,6}){1,2}", 1..24),
            port in 1u16..,
        ) {
            let routes: Vec<String> = hosts
                .iter()
                .enumerate()
                .map(|(i, host)| format!("{}=backend-{}.internal:{}", host, i, port))
                .collect();
            let table = RouteTable::parse_all(&routes).unwrap();
            prop_assert_eq!(table.len(), hosts.len());

            for (i, host) in hosts.iter().enumerate() {
                let expected = format!("backend-{}.internal:{}", i, port);
                let route = table.lookup(host).unwrap();
                prop_assert_eq!(route.target(), Some(expected.as_str()));
                let upper = table.lookup(&host.to_uppercase()).unwrap();
                prop_assert_eq!(&upper.hostname, host);
            }
            prop_assert!(table.lookup("absent.invalid").is_none());
        }
    }
}
