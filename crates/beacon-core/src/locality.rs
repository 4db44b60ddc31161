//! Same-network heuristic for forwarded messages.
//!
//! The hint lets two peers behind the same NAT, or on the same IPv6 /64,
//! try a direct local connection first. It is advisory only.

use beacon_protocol::Locality;

use crate::identity::Endpoint;

/// Number of leading colon-delimited groups compared for group-form addresses.
const PREFIX_GROUPS: usize = 4;

/// Whether two addresses appear to be on the same network.
///
/// Rules, in order:
/// 1. either address empty: `false`
/// 2. identical strings: `true`
/// 3. both contain `:`: equal iff the first four colon-delimited groups match
/// 4. otherwise `false`
///
/// Dotted-quad addresses are only same-network when identical (shared NAT
/// egress). Compressed IPv6 forms are compared textually.
#[must_use]
pub fn same_network(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    if a.contains(':') && b.contains(':') {
        return a
            .split(':')
            .take(PREFIX_GROUPS)
            .eq(b.split(':').take(PREFIX_GROUPS));
    }
    false
}

/// Build the locality annotation for a message from `sender_ip` to a peer
/// last seen at `target`.
#[must_use]
pub fn annotate(sender_ip: Option<&str>, target: Option<&Endpoint>) -> Locality {
    let target_ip = target.map(|e| e.address.as_str());
    Locality {
        same_network: same_network(sender_ip.unwrap_or_default(), target_ip.unwrap_or_default()),
        sender_ip: sender_ip.map(str::to_string),
        target_ip: target_ip.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_never_local() {
        assert!(!same_network("", ""));
        assert!(!same_network("10.0.0.5", ""));
        assert!(!same_network("", "10.0.0.5"));
    }

    #[test]
    fn test_identical_addresses() {
        assert!(same_network("10.0.0.5", "10.0.0.5"));
        assert!(same_network("2001:db8::1", "2001:db8::1"));
    }

    #[test]
    fn test_ipv4_is_not_cidr_aware() {
        assert!(!same_network("10.0.0.5", "10.0.0.6"));
        assert!(!same_network("192.168.1.1", "192.168.1.2"));
    }

    #[test]
    fn test_ipv6_prefix() {
        assert!(same_network(
            "2001:db8:85a3:1:aaaa:bbbb:cccc:1",
            "2001:db8:85a3:1:dddd:eeee:ffff:2"
        ));
        assert!(!same_network(
            "2001:db8:85a3:1:aaaa:bbbb:cccc:1",
            "2001:db8:85a3:2:aaaa:bbbb:cccc:1"
        ));
    }

    #[test]
    fn test_mixed_families() {
        assert!(!same_network("10.0.0.5", "2001:db8::1"));
        assert!(!same_network("2001:db8::1", "10.0.0.5"));
    }

    #[test]
    fn test_symmetry() {
        let samples = [
            "",
            "10.0.0.5",
            "10.0.0.6",
            "2001:db8:1:2::1",
            "2001:db8:1:2::9",
            "2001:db8:1:3::1",
            "::1",
            "fe80::1",
        ];
        for a in samples {
            for b in samples {
                assert_eq!(same_network(a, b), same_network(b, a), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_annotate() {
        let target = Endpoint::new("10.0.0.5").with_port(4433);
        let loc = annotate(Some("10.0.0.5"), Some(&target));
        assert!(loc.same_network);
        assert_eq!(loc.target_ip.as_deref(), Some("10.0.0.5"));

        let loc = annotate(Some("10.0.0.5"), None);
        assert!(!loc.same_network);
        assert!(loc.target_ip.is_none());
    }
}
