use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

const DEFAULT_PORT: u16 = 6379;

/// Host and port of a cluster node.
///
/// Addresses order by host, then port, which keeps node maps iterating in a
/// stable order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeAddress {
    host: String,
    port: u16,
}

impl NodeAddress {
    /// Creates an address from a host name or IP and a port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host part.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Parses `host:port`, `[v6]:port` or a `redis://` URL.
    ///
    /// A missing port defaults to 6379.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the input is not a usable address.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(invalid(input, "empty address"));
        }

        let with_scheme = if input.contains("://") {
            input.to_string()
        } else {
            format!("redis://{}", input)
        };

        let url = url::Url::parse(&with_scheme).map_err(|e| invalid(input, &e.to_string()))?;
        if url.scheme() != "redis" {
            return Err(invalid(input, "expected redis:// scheme"));
        }

        let host = match url.host() {
            Some(url::Host::Ipv6(ip)) => ip.to_string(),
            Some(host) => host.to_string(),
            None => return Err(invalid(input, "missing host")),
        };

        Ok(Self::new(host, url.port().unwrap_or(DEFAULT_PORT)))
    }
}

fn invalid(input: &str, reason: &str) -> Error {
    Error::InvalidArgument {
        message: format!("invalid node address '{}': {}", input, reason),
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for NodeAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let addr = NodeAddress::parse("127.0.0.1:7000").unwrap();
        assert_eq!(addr, NodeAddress::new("127.0.0.1", 7000));
        assert_eq!(addr.to_string(), "127.0.0.1:7000");
    }

    #[test]
    fn test_parse_url_and_default_port() {
        let addr: NodeAddress = "redis://cache.local".parse().unwrap();
        assert_eq!(addr.host(), "cache.local");
        assert_eq!(addr.port(), 6379);
    }

    #[test]
    fn test_parse_ipv6() {
        let addr = NodeAddress::parse("[::1]:7001").unwrap();
        assert_eq!(addr.host(), "::1");
        assert_eq!(addr.port(), 7001);
        assert_eq!(addr.to_string(), "[::1]:7001");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(NodeAddress::parse("").is_err());
        assert!(NodeAddress::parse("http://host:1").is_err());
        assert!(NodeAddress::parse("host:notaport").is_err());
    }

    #[test]
    fn test_ordering() {
        let mut addrs = vec![
            NodeAddress::new("b", 1),
            NodeAddress::new("a", 2),
            NodeAddress::new("a", 1),
        ];
        addrs.sort();
        assert_eq!(addrs[0], NodeAddress::new("a", 1));
        assert_eq!(addrs[2], NodeAddress::new("b", 1));
    }
}
