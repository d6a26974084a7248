//! Socket address parsing.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::Error;

/// Parse an IP literal plus port into a socket address.
///
/// Tries IPv4 first, then IPv6; the port is applied after the family has
/// been decided. No DNS resolution ever happens here.
pub fn parse_host_port(host: &str, port: u16) -> Result<SocketAddr, Error> {
    if let Ok(v4) = host.parse::<Ipv4Addr>() {
        return Ok(SocketAddr::from((v4, port)));
    }
    if let Ok(v6) = host.parse::<Ipv6Addr>() {
        return Ok(SocketAddr::from((v6, port)));
    }
    Err(Error::BadAddress {
        host: host.to_string(),
        port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4() {
        let addr = parse_host_port("127.0.0.1", 8000).unwrap();
        assert!(addr.is_ipv4());
        assert_eq!(addr.port(), 8000);
    }

    #[test]
    fn parses_ipv6() {
        let addr = parse_host_port("::1", 1443).unwrap();
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), 1443);
    }

    #[test]
    fn rejects_hostnames_and_garbage() {
        assert!(matches!(
            parse_host_port("example.com", 443),
            Err(Error::BadAddress { .. })
        ));
        assert!(matches!(
            parse_host_port("", 443),
            Err(Error::BadAddress { .. })
        ));
        assert!(matches!(
            parse_host_port("300.0.0.1", 443),
            Err(Error::BadAddress { .. })
        ));
    }
}
