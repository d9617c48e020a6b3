use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use crate::error::WxError;

/// TCP service address of a console, from discovery or static configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceAddress {
    pub host: String,
    pub port: u16,
}

impl DeviceAddress {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
    /// Build from the raw IPv4 bytes carried in a discovery reply.
    #[must_use]
    pub fn from_octets(ip: [u8; 4], port: u16) -> Self {
        Self::new(Ipv4Addr::from(ip).to_string(), port)
    }
    /// `"host:port"` (`"[v6]:port"` for IPv6 literals), suitable for `TcpStream::connect`.
    #[must_use]
    pub fn addr(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.port).to_string(),
            Err(_) => format!("{}:{}", self.host, self.port),
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr())
    }
}

impl FromStr for DeviceAddress {
    type Err = WxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| WxError::Config(format!("address without port: {s}")))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| WxError::Config(format!("bad port in {s}: {e}")))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(WxError::Config(format!("address without host: {s}")));
        }
        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port() {
        let a: DeviceAddress = "192.168.1.50:45000".parse().expect("parse");
        assert_eq!(a, DeviceAddress::new("192.168.1.50", 45000));
        assert_eq!(a.addr(), "192.168.1.50:45000");
        assert!("192.168.1.50".parse::<DeviceAddress>().is_err());
        assert!(":45000".parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn from_octets_formats_dotted() {
        let a = DeviceAddress::from_octets([192, 168, 1, 50], 45000);
        assert_eq!(a.host, "192.168.1.50");
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let a = DeviceAddress::new("::1", 45000);
        assert_eq!(a.addr(), "[::1]:45000");
        assert_eq!(a.to_string(), "[::1]:45000");
        let parsed: SocketAddr = a.addr().parse().expect("socket addr");
        assert_eq!(parsed.port(), 45000);
        let back: DeviceAddress = "[::1]:45000".parse().expect("parse");
        assert_eq!(back, a);
        assert_eq!(DeviceAddress::new("console.lan", 45000).addr(), "console.lan:45000");
    }
}
