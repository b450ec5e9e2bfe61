//! SSRF (Server-Side Request Forgery) protection.
//!
//! The image proxy fetches arbitrary caller-supplied URLs, so every target is
//! resolved and each A/AAAA answer checked before a request leaves the host.
use std::net::IpAddr;
use std::sync::LazyLock;

use ipnet::IpNet;

/// Denied URL schemes that should never be fetched.
pub const DENIED_SCHEMES: &[&str] = &["file", "ftp", "data", "javascript", "about", "blob", "ws", "wss"];

/// Reserved ranges the std predicates do not cover.
static RESERVED_NETS: LazyLock<Vec<IpNet>> = LazyLock::new(|| {
    [
        "100.64.0.0/10",
        "192.0.0.0/24",
        "192.0.2.0/24",
        "198.18.0.0/15",
        "198.51.100.0/24",
        "203.0.113.0/24",
        "240.0.0.0/4",
        "64:ff9b::/96",
        "2001:db8::/32",
    ]
    .iter()
    .filter_map(|cidr| cidr.parse().ok())
    .collect()
});

/// Error type for SSRF validation failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SsrfError {
    #[error("blocked scheme: {0}")]
    BlockedScheme(String),

    #[error("blocked IP: {0} (private/reserved)")]
    BlockedIp(IpAddr),

    #[error("DNS resolution failed: {0}")]
    DnsError(String),
}

/// Check if an IP address is private, reserved, or otherwise blocked.
///
/// This covers:
/// - Loopback addresses (127.0.0.0/8, ::1)
/// - RFC 1918 private ranges (10/8, 172.16/12, 192.168/16)
/// - Link-local addresses (169.254/16, fe80::/10)
/// - Multicast, broadcast and unspecified addresses
/// - IPv6 unique local (fc00::/7) and IPv4-mapped forms of the above
/// - CGNAT, benchmarking and documentation ranges
pub fn is_private_or_reserved(ip: IpAddr) -> bool {
    let blocked = match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.octets()[0] == 0
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_or_reserved(IpAddr::V4(mapped));
            }
            v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    };
    blocked || RESERVED_NETS.iter().any(|net| net.contains(&ip))
}

/// Validate that an IP address is not private or reserved.
pub fn validate_ip(ip: IpAddr) -> Result<(), SsrfError> {
    if is_private_or_reserved(ip) { Err(SsrfError::BlockedIp(ip)) } else { Ok(()) }
}

/// Resolve the URL's host and reject it if any answer is private or reserved.
///
/// IP-literal hosts are checked without a lookup.
pub async fn check_url(url: &url::Url) -> Result<(), SsrfError> {
    if DENIED_SCHEMES.contains(&url.scheme()) {
        return Err(SsrfError::BlockedScheme(url.scheme().to_string()));
    }

    let host = match url.host() {
        Some(url::Host::Ipv4(v4)) => return validate_ip(IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => return validate_ip(IpAddr::V6(v6)),
        Some(url::Host::Domain(domain)) => domain.to_string(),
        None => return Err(SsrfError::DnsError("URL has no host".into())),
    };
    let port = url.port_or_known_default().unwrap_or(443);

    let addrs = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| SsrfError::DnsError(format!("{host}: {e}")))?;

    let mut resolved = 0usize;
    for addr in addrs {
        validate_ip(addr.ip())?;
        resolved += 1;
    }
    if resolved == 0 {
        return Err(SsrfError::DnsError(format!("{host}: no addresses")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_loopback_and_private_v4() {
        for ip in [
            Ipv4Addr::new(127, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(172, 31, 255, 255),
            Ipv4Addr::new(192, 168, 0, 1),
            Ipv4Addr::new(169, 254, 169, 254),
            Ipv4Addr::new(0, 0, 0, 1),
        ] {
            assert!(is_private_or_reserved(IpAddr::V4(ip)), "{ip} should be blocked");
        }
    }

    #[test]
    fn test_reserved_ranges_from_table() {
        assert!(is_private_or_reserved(IpAddr::V4(Ipv4Addr::new(100, 64, 0, 1))));
        assert!(is_private_or_reserved(IpAddr::V4(Ipv4Addr::new(198, 19, 10, 10))));
        assert!(is_private_or_reserved(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7))));
        assert!(!is_private_or_reserved(IpAddr::V4(Ipv4Addr::new(100, 128, 0, 1))));
    }

    #[test]
    fn test_v6_ranges() {
        assert!(is_private_or_reserved(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(is_private_or_reserved(IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1))));
        assert!(is_private_or_reserved(IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1))));
        assert!(!is_private_or_reserved(IpAddr::V6(Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 1))));
    }

    #[test]
    fn test_ipv4_mapped_v6() {
        let mapped = Ipv4Addr::new(127, 0, 0, 1).to_ipv6_mapped();
        assert!(is_private_or_reserved(IpAddr::V6(mapped)));
    }

    #[test]
    fn test_public_v4() {
        assert!(validate_ip(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))).is_ok());
        assert!(validate_ip(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))).is_ok());
    }

    #[tokio::test]
    async fn test_check_url_ip_literals() {
        let local = url::Url::parse("http://127.0.0.1:8080/x.png").unwrap();
        assert!(matches!(check_url(&local).await, Err(SsrfError::BlockedIp(_))));

        let metadata = url::Url::parse("http://[::ffff:169.254.169.254]/latest").unwrap();
        assert!(matches!(check_url(&metadata).await, Err(SsrfError::BlockedIp(_))));

        let public = url::Url::parse("https://8.8.8.8/x.png").unwrap();
        assert!(check_url(&public).await.is_ok());
    }

    #[tokio::test]
    async fn test_check_url_localhost_name() {
        let url = url::Url::parse("http://localhost/x.png").unwrap();
        assert!(check_url(&url).await.is_err());
    }

    #[tokio::test]
    async fn test_check_url_denied_scheme() {
        let url = url::Url::parse("ftp://files.example.com/x.png").unwrap();
        assert!(matches!(check_url(&url).await, Err(SsrfError::BlockedScheme(_))));
    }
}
