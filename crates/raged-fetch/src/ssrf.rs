//! SSRF guard
//!
//! Validates a URL before any connection is made: scheme allow-list, a
//! hostname denylist, and a resolved-address check against loopback,
//! private, link-local, CGNAT and the corresponding IPv6 ranges. Every
//! redirect hop runs through this again.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::warn;
use url::Url;

use crate::error::{FetchError, FetchReason};

/// Hostnames rejected outright, before resolution
const DENIED_HOSTS: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
];

/// Whether an IPv4 address falls in a denied range
fn is_denied_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()            // 127.0.0.0/8
        || ip.is_private()      // 10/8, 172.16/12, 192.168/16
        || ip.is_link_local()   // 169.254/16 (cloud metadata lives here)
        || ip.is_unspecified()  // 0.0.0.0
        || ip.is_broadcast()
        // CGNAT 100.64.0.0/10
        || (octets[0] == 100 && (64..128).contains(&octets[1]))
}

/// Whether an IPv6 address falls in a denied range
fn is_denied_ipv6(ip: Ipv6Addr) -> bool {
    let segments = ip.segments();
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_denied_ipv4(mapped);
    }
    ip.is_loopback()                              // ::1
        || ip.is_unspecified()                    // ::
        || (segments[0] & 0xfe00) == 0xfc00       // fc00::/7 unique local
        || (segments[0] & 0xffc0) == 0xfe80       // fe80::/10 link-local
        || (segments[0] & 0xffc0) == 0xfec0       // fec0::/10 site-local
}

/// Whether an address falls in any denied range
pub fn is_denied_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_denied_ipv4(v4),
        IpAddr::V6(v6) => is_denied_ipv6(v6),
    }
}

/// Validate a URL before connecting
///
/// Checks the scheme, the hostname denylist, and resolves the host to check
/// every address against the denied ranges. A host that resolves to even one
/// denied address is rejected.
///
/// # Errors
///
/// Returns an [`FetchError`] with reason `ssrf_blocked` on any violation,
/// or `fetch_failed` when the host does not resolve at all.
pub async fn ensure_url_allowed(url: &Url) -> Result<(), FetchError> {
    let blocked = |detail: String| {
        warn!(%url, detail, "URL rejected by SSRF guard");
        FetchError::new(url.as_str(), FetchReason::SsrfBlocked, detail)
    };

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(blocked(format!("unsupported scheme '{scheme}'")));
        }
    }

    let Some(host) = url.host_str() else {
        return Err(blocked("missing host".to_string()));
    };
    let host_lower = host.to_ascii_lowercase();
    if DENIED_HOSTS.contains(&host_lower.as_str()) || host_lower.ends_with(".localhost") {
        return Err(blocked(format!("denied hostname '{host}'")));
    }

    // A literal address skips DNS.
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_denied_ip(ip) {
            return Err(blocked(format!("address {ip} is in a denied range")));
        }
        return Ok(());
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let resolved = tokio::net::lookup_host((host, port)).await.map_err(|e| {
        FetchError::new(
            url.as_str(),
            FetchReason::FetchFailed,
            format!("resolving '{host}': {e}"),
        )
    })?;

    let mut any = false;
    for addr in resolved {
        any = true;
        if is_denied_ip(addr.ip()) {
            return Err(blocked(format!(
                "'{host}' resolves to denied address {}",
                addr.ip()
            )));
        }
    }
    if !any {
        return Err(FetchError::new(
            url.as_str(),
            FetchReason::FetchFailed,
            format!("'{host}' resolved to no addresses"),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn v4(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn v6(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn loopback_and_unspecified_are_denied() {
        assert!(is_denied_ip(v4("127.0.0.1")));
        assert!(is_denied_ip(v4("127.255.255.255")));
        assert!(is_denied_ip(v4("0.0.0.0")));
        assert!(is_denied_ip(v6("::1")));
        assert!(is_denied_ip(v6("::")));
    }

    #[test]
    fn private_range_boundaries() {
        // 10/8
        assert!(is_denied_ip(v4("10.0.0.0")));
        assert!(is_denied_ip(v4("10.255.255.255")));
        assert!(!is_denied_ip(v4("9.255.255.255")));
        assert!(!is_denied_ip(v4("11.0.0.0")));

        // 172.16/12: edges on both sides
        assert!(!is_denied_ip(v4("172.15.255.255")));
        assert!(is_denied_ip(v4("172.16.0.0")));
        assert!(is_denied_ip(v4("172.31.255.255")));
        assert!(!is_denied_ip(v4("172.32.0.0")));

        // 192.168/16
        assert!(is_denied_ip(v4("192.168.0.1")));
        assert!(!is_denied_ip(v4("192.167.255.255")));
        assert!(!is_denied_ip(v4("192.169.0.0")));
    }

    #[test]
    fn link_local_includes_metadata_address() {
        assert!(is_denied_ip(v4("169.254.169.254")));
        assert!(is_denied_ip(v4("169.254.0.1")));
        assert!(!is_denied_ip(v4("169.253.255.255")));
        assert!(!is_denied_ip(v4("169.255.0.0")));
    }

    #[test]
    fn cgnat_range_boundaries() {
        assert!(!is_denied_ip(v4("100.63.255.255")));
        assert!(is_denied_ip(v4("100.64.0.0")));
        assert!(is_denied_ip(v4("100.127.255.255")));
        assert!(!is_denied_ip(v4("100.128.0.0")));
    }

    #[test]
    fn ipv6_special_ranges() {
        assert!(is_denied_ip(v6("fe80::1")));
        assert!(is_denied_ip(v6("febf::1")));
        assert!(is_denied_ip(v6("fec0::1")));
        assert!(is_denied_ip(v6("fc00::1")));
        assert!(is_denied_ip(v6("fdff::1")));
        assert!(!is_denied_ip(v6("2001:db8::1")));
    }

    #[test]
    fn v4_mapped_ipv6_checks_the_inner_address() {
        assert!(is_denied_ip(v6("::ffff:127.0.0.1")));
        assert!(is_denied_ip(v6("::ffff:10.0.0.1")));
        assert!(!is_denied_ip(v6("::ffff:93.184.216.34")));
    }

    #[tokio::test]
    async fn rejects_unsupported_scheme() {
        let url = Url::parse("ftp://example.com/file").unwrap();
        let err = ensure_url_allowed(&url).await.unwrap_err();
        assert_eq!(err.reason, FetchReason::SsrfBlocked);
    }

    #[tokio::test]
    async fn rejects_localhost_variants() {
        for raw in [
            "http://localhost/",
            "http://LOCALHOST:8080/x",
            "http://foo.localhost/",
            "http://ip6-localhost/",
        ] {
            let url = Url::parse(raw).unwrap();
            let err = ensure_url_allowed(&url).await.unwrap_err();
            assert_eq!(err.reason, FetchReason::SsrfBlocked, "{raw} must be blocked");
        }
    }

    #[tokio::test]
    async fn rejects_literal_denied_addresses() {
        for raw in [
            "http://127.0.0.1/",
            "http://10.1.2.3/",
            "http://169.254.169.254/latest/meta-data",
            "http://[::1]/",
            "http://[fe80::1]/",
        ] {
            let url = Url::parse(raw).unwrap();
            let err = ensure_url_allowed(&url).await.unwrap_err();
            assert_eq!(err.reason, FetchReason::SsrfBlocked, "{raw} must be blocked");
        }
    }

    #[tokio::test]
    async fn accepts_public_literal_addresses() {
        let url = Url::parse("http://93.184.216.34/").unwrap();
        assert!(ensure_url_allowed(&url).await.is_ok());
    }
}
