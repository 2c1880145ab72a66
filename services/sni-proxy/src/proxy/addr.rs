//! `host:port` syntax helpers.
//!
//! Accepts `host:port`, `:port` and `[v6addr]:port`. The port is not
//! checked for being numeric here; callers decide how strict to be.

use crate::error::AddrError;

/// Split `host:port` into its host and port parts.
///
/// Brackets around an IPv6 host are stripped from the returned host.
pub fn split_host_port(hostport: &str) -> Result<(&str, &str), AddrError> {
    let colon = hostport.rfind(':').ok_or(AddrError::MissingPort)?;

    // `open` and `close` bound the regions that must not contain stray brackets.
    let (host, open, close) = if let Some(rest) = hostport.strip_prefix('[') {
        let end = rest.find(']').ok_or(AddrError::MissingBracket)? + 1;
        let after = end + 1;
        if after == hostport.len() {
            return Err(AddrError::MissingPort);
        }
        if after != colon {
            return if hostport.as_bytes()[after] == b':' {
                Err(AddrError::TooManyColons)
            } else {
                Err(AddrError::MissingPort)
            };
        }
        (&hostport[1..end], 1, after)
    } else {
        let host = &hostport[..colon];
        if host.contains(':') {
            return Err(AddrError::TooManyColons);
        }
        (host, 0, 0)
    };

    if hostport[open..].contains('[') || hostport[close..].contains(']') {
        return Err(AddrError::UnexpectedBracket);
    }

    Ok((host, &hostport[colon + 1..]))
}

/// Parse a numeric TCP port.
pub fn parse_port(port: &str) -> Option<u16> {
    port.parse().ok()
}
