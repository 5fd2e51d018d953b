//! Local subnet detection and CIDR validation.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use ipnet::Ipv4Net;
use radar_core::RadarError;

/// Public address used only to pick the outbound interface. Nothing is sent.
const ROUTE_PROBE: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 80);

const LOCAL_PREFIX_LEN: u8 = 24;

/// Determine the /24 the host faces the network on.
///
/// Connects a UDP socket towards a public address so the OS picks the
/// outbound interface, then reads the local address back. Falls back to
/// `127.0.0.0/24` when there is no route.
pub fn detect_local_subnet() -> Ipv4Net {
    match local_ipv4() {
        Ok(ip) => {
            let net = network_for(ip);
            tracing::debug!(local_ip = %ip, subnet = %net, "Detected local subnet");
            net
        }
        Err(e) => {
            let net = network_for(Ipv4Addr::LOCALHOST);
            tracing::warn!(error = %e, fallback = %net, "Could not detect local subnet");
            net
        }
    }
}

fn local_ipv4() -> io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(ROUTE_PROBE)?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Ok(ip),
        other => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no usable IPv4 source address ({other})"),
        )),
    }
}

fn network_for(ip: Ipv4Addr) -> Ipv4Net {
    Ipv4Net::new(ip, LOCAL_PREFIX_LEN)
        .map(|net| net.trunc())
        .unwrap_or_else(|_| Ipv4Net::from(ip))
}

/// Parse and validate a user-supplied subnet.
///
/// Accepts `a.b.c.d/len` or a bare address (treated as `/32`). Host bits
/// are cleared, so `192.168.1.7/24` yields `192.168.1.0/24`.
pub fn validate(input: &str) -> Result<Ipv4Net, RadarError> {
    let trimmed = input.trim();
    let invalid = |reason: String| RadarError::InvalidSubnet {
        input: input.to_string(),
        reason,
    };

    if trimmed.is_empty() {
        return Err(invalid("empty input".to_string()));
    }

    let (addr, prefix) = match trimmed.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (trimmed, None),
    };

    let ip: Ipv4Addr = match addr.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ip,
        Ok(IpAddr::V6(_)) => return Err(invalid("IPv6 subnets are not supported".to_string())),
        Err(e) => return Err(invalid(e.to_string())),
    };

    let prefix_len = match prefix {
        Some(p) => p
            .parse::<u8>()
            .map_err(|e| invalid(format!("bad prefix length '{p}': {e}")))?,
        None => 32,
    };

    Ipv4Net::new(ip, prefix_len)
        .map(|net| net.trunc())
        .map_err(|e| invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_roundtrip() {
        for cidr in ["10.0.0.0/8", "192.168.1.0/24", "172.16.4.0/22", "10.1.2.3/32"] {
            let net = validate(cidr).unwrap();
            assert_eq!(net.to_string(), cidr);
            assert_eq!(validate(&net.to_string()).unwrap(), net);
        }
    }

    #[test]
    fn test_validate_clears_host_bits() {
        let net = validate("192.168.1.77/24").unwrap();
        assert_eq!(net.network(), Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(net.prefix_len(), 24);
    }

    #[test]
    fn test_validate_bare_address() {
        let net = validate(" 10.0.0.9 ").unwrap();
        assert_eq!(net.to_string(), "10.0.0.9/32");
    }

    #[test]
    fn test_validate_rejects_malformed() {
        for bad in ["not-an-ip", "10.0.0.0/99", "", "10.0.0/24", "10.0.0.0/abc", "::1/64"] {
            let err = validate(bad).unwrap_err();
            assert!(
                matches!(err, RadarError::InvalidSubnet { .. }),
                "expected InvalidSubnet for {bad:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_detect_local_subnet_is_slash_24() {
        // Works with or without a route: the fallback is 127.0.0.0/24.
        let net = detect_local_subnet();
        assert_eq!(net.prefix_len(), 24);
        assert_eq!(net, net.trunc());
    }

    #[test]
    fn test_network_for() {
        assert_eq!(
            network_for(Ipv4Addr::LOCALHOST).to_string(),
            "127.0.0.0/24"
        );
    }
}
