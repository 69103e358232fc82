//! Private and reserved address ranges outbound requests may not reach.

use ipnetwork::IpNetwork;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

const IPV4_LOOPBACK: (IpAddr, u8) = (IpAddr::V4(Ipv4Addr::new(127, 0, 0, 0)), 8);

/// Ranges blocked by default, in match order.
const DEFAULT_RANGES: [(IpAddr, u8); 15] = [
    IPV4_LOOPBACK,
    (IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)), 8),
    (IpAddr::V4(Ipv4Addr::new(100, 64, 0, 0)), 10),
    (IpAddr::V4(Ipv4Addr::new(172, 16, 0, 0)), 12),
    (IpAddr::V4(Ipv4Addr::new(192, 0, 0, 0)), 24),
    (IpAddr::V4(Ipv4Addr::new(192, 168, 0, 0)), 16),
    (IpAddr::V4(Ipv4Addr::new(198, 18, 0, 0)), 15),
    (IpAddr::V4(Ipv4Addr::new(192, 0, 2, 0)), 24),
    (IpAddr::V4(Ipv4Addr::new(198, 51, 100, 0)), 24),
    (IpAddr::V4(Ipv4Addr::new(203, 0, 113, 0)), 24),
    (IpAddr::V4(Ipv4Addr::new(169, 254, 0, 0)), 16),
    (IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8),
    (IpAddr::V6(Ipv6Addr::LOCALHOST), 128),
    (IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0)), 10),
    (IpAddr::V6(Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0)), 7),
];

/// Outcome of the pre-connect check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectDecision {
    Proceed,
    Reject(RejectReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// The dial address was not `ip:port`.
    Unparseable,
    /// The address falls inside a blocked range.
    Private(IpAddr),
}

/// Immutable set of blocked ranges. Build once, share behind an `Arc`.
#[derive(Clone, Debug)]
pub struct BlockList {
    networks: Vec<IpNetwork>,
}

impl Default for BlockList {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BlockList {
    #[must_use]
    pub fn builder() -> BlockListBuilder {
        BlockListBuilder::default()
    }

    #[must_use]
    pub fn networks(&self) -> &[IpNetwork] {
        &self.networks
    }

    /// IPv4-mapped IPv6 addresses are checked as the IPv4 address they carry.
    #[must_use]
    pub fn is_private(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        self.networks.iter().any(|network| network.contains(ip))
    }

    #[must_use]
    pub fn decide_ip(&self, ip: IpAddr) -> ConnectDecision {
        if self.is_private(ip) {
            ConnectDecision::Reject(RejectReason::Private(ip))
        } else {
            ConnectDecision::Proceed
        }
    }

    /// Decide on a dial address of the form `ip:port` (`[v6]:port` for IPv6).
    #[must_use]
    pub fn decide(&self, addr: &str) -> ConnectDecision {
        match addr.parse::<SocketAddr>() {
            Ok(addr) => self.decide_ip(addr.ip()),
            Err(_) => ConnectDecision::Reject(RejectReason::Unparseable),
        }
    }
}

/// Options applied before the list is frozen.
#[derive(Debug, Default)]
pub struct BlockListBuilder {
    allow_loopback: bool,
    prepended: Vec<IpNetwork>,
}

impl BlockListBuilder {
    /// Drop the IPv4 loopback range, for local development and tests.
    #[must_use]
    pub fn allow_loopback(mut self) -> Self {
        self.allow_loopback = true;
        self
    }

    /// Block an extra range, checked before the defaults.
    #[must_use]
    pub fn prepend(mut self, network: IpNetwork) -> Self {
        self.prepended.push(network);
        self
    }

    #[must_use]
    pub fn build(self) -> BlockList {
        let defaults = DEFAULT_RANGES
            .iter()
            .filter(|range| !(self.allow_loopback && **range == IPV4_LOOPBACK))
            .filter_map(|(addr, prefix)| IpNetwork::new(*addr, *prefix).ok());

        // later prepends end up in front, like repeated unshifts
        let networks = self
            .prepended
            .into_iter()
            .rev()
            .chain(defaults)
            .collect();

        BlockList { networks }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ip(value: &str) -> IpAddr {
        value.parse().unwrap()
    }

    #[test]
    fn default_table_is_complete() {
        assert_eq!(BlockList::default().networks().len(), DEFAULT_RANGES.len());
    }

    #[test]
    fn private_ranges_are_blocked() {
        let list = BlockList::default();
        for addr in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.5",
            "192.168.1.1",
            "169.254.169.254",
            "100.64.0.1",
            "0.0.0.0",
            "::1",
            "fe80::1",
            "fd00::1",
            "::ffff:127.0.0.1",
            "::ffff:10.0.0.1",
        ] {
            assert!(list.is_private(ip(addr)), "{addr} should be private");
        }
    }

    #[test]
    fn public_addresses_pass() {
        let list = BlockList::default();
        for addr in ["8.8.8.8", "1.1.1.1", "172.32.0.1", "2606:4700:4700::1111", "::ffff:8.8.8.8"] {
            assert!(!list.is_private(ip(addr)), "{addr} should be public");
        }
    }

    #[test]
    fn allow_loopback_only_removes_ipv4_loopback() {
        let list = BlockList::builder().allow_loopback().build();
        assert!(!list.is_private(ip("127.0.0.1")));
        assert!(list.is_private(ip("::1")));
        assert!(list.is_private(ip("10.0.0.1")));
    }

    #[test]
    fn prepended_ranges_come_first() {
        let first: IpNetwork = "8.8.8.0/24".parse().unwrap();
        let second: IpNetwork = "1.1.1.0/24".parse().unwrap();
        let list = BlockList::builder().prepend(first).prepend(second).build();
        assert!(list.is_private(ip("8.8.8.8")));
        assert!(list.is_private(ip("1.1.1.1")));
        assert_eq!(list.networks()[0], second);
        assert_eq!(list.networks()[1], first);
    }

    #[test]
    fn decide_parses_dial_addresses() {
        let list = BlockList::default();
        assert_eq!(list.decide("8.8.8.8:443"), ConnectDecision::Proceed);
        assert_eq!(list.decide("[2606:4700:4700::1111]:443"), ConnectDecision::Proceed);
        assert_eq!(
            list.decide("127.0.0.1:80"),
            ConnectDecision::Reject(RejectReason::Private(ip("127.0.0.1")))
        );
        assert_eq!(
            list.decide("[::1]:80"),
            ConnectDecision::Reject(RejectReason::Private(ip("::1")))
        );
        assert_eq!(
            list.decide("example.com:80"),
            ConnectDecision::Reject(RejectReason::Unparseable)
        );
        assert_eq!(
            list.decide("10.0.0.1"),
            ConnectDecision::Reject(RejectReason::Unparseable)
        );
    }
}
