//! Normalized subnet representation.
//!
//! Every subnet is stored as a 128-bit base address plus a 128-bit prefix
//! length. IPv4 networks are embedded as IPv4-mapped IPv6 (`::ffff:a.b.c.d`)
//! with their prefix shifted by 96, so a single integer ordering sorts both
//! families consistently.

use ipnet::IpNet;
use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::{Result, ShortcutError};

/// `::ffff:0:0`, the IPv4-mapped IPv6 prefix.
const V4_MAPPED: u128 = 0xffff_0000_0000;

/// Bits taken by the IPv4-mapped prefix.
const V4_OFFSET: u8 = 96;

/// Address family of a subnet or a query address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    /// Family of an address. IPv4-mapped IPv6 addresses count as IPv4.
    pub fn of(ip: IpAddr) -> Family {
        match ip.to_canonical() {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }

    /// Longest prefix allowed for this family.
    pub fn max_prefix_len(self) -> u8 {
        match self {
            Family::V4 => 32,
            Family::V6 => 128,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::V4 => f.write_str("ipv4"),
            Family::V6 => f.write_str("ipv6"),
        }
    }
}

/// Normalize a query address to its family and 128-bit value.
pub(crate) fn normalize(ip: IpAddr) -> (Family, u128) {
    match ip.to_canonical() {
        IpAddr::V4(v4) => (Family::V4, V4_MAPPED | u128::from(u32::from(v4))),
        IpAddr::V6(v6) => (Family::V6, u128::from(v6)),
    }
}

fn mask(prefix: u8) -> u128 {
    u128::MAX
        .checked_shl(128 - u32::from(prefix))
        .unwrap_or(0)
}

/// A CIDR range with its host bits zeroed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    base: u128,
    prefix: u8,
    family: Family,
}

impl Subnet {
    /// Create a subnet from an address and a family-relative prefix length.
    ///
    /// The address is masked, so `10.1.2.3/8` becomes `10.0.0.0/8`.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Subnet> {
        let (family, bits, offset) = match addr {
            IpAddr::V4(v4) => (Family::V4, V4_MAPPED | u128::from(u32::from(v4)), V4_OFFSET),
            IpAddr::V6(v6) => (Family::V6, u128::from(v6), 0),
        };
        if prefix_len > family.max_prefix_len() {
            return Err(ShortcutError::Parse(format!(
                "prefix length {} too long for {}",
                prefix_len, family
            )));
        }
        let prefix = prefix_len + offset;
        Ok(Subnet {
            base: bits & mask(prefix),
            prefix,
            family,
        })
    }

    /// Single-address subnet (`/32` or `/128`).
    pub fn host(addr: IpAddr) -> Subnet {
        let (family, base) = match addr {
            IpAddr::V4(v4) => (Family::V4, V4_MAPPED | u128::from(u32::from(v4))),
            IpAddr::V6(v6) => (Family::V6, u128::from(v6)),
        };
        Subnet {
            base,
            prefix: 128,
            family,
        }
    }

    /// Parse `a.b.c.d/n`, an IPv6 CIDR, or a bare address (host route).
    pub fn parse(s: &str) -> Result<Subnet> {
        let s = s.trim();
        if s.contains('/') {
            let net: IpNet = s
                .parse()
                .map_err(|_| ShortcutError::Parse(format!("invalid CIDR: {}", s)))?;
            Subnet::new(net.addr(), net.prefix_len())
        } else {
            let ip: IpAddr = s
                .parse()
                .map_err(|_| ShortcutError::Parse(format!("invalid IP address: {}", s)))?;
            Ok(Subnet::host(ip))
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// Prefix length relative to the subnet's own family.
    pub fn prefix_len(&self) -> u8 {
        match self.family {
            Family::V4 => self.prefix - V4_OFFSET,
            Family::V6 => self.prefix,
        }
    }

    /// Network (first) address.
    pub fn network(&self) -> IpAddr {
        self.to_addr(self.base)
    }

    /// Last address of the range (the broadcast address for IPv4).
    pub fn last(&self) -> IpAddr {
        self.to_addr(self.last_bits())
    }

    /// Whether `ip` falls inside this subnet. Addresses of the other family
    /// never match.
    pub fn contains(&self, ip: IpAddr) -> bool {
        let (family, bits) = normalize(ip);
        family == self.family && self.contains_bits(bits)
    }

    /// Whether `other` lies entirely inside this subnet.
    pub fn contains_subnet(&self, other: &Subnet) -> bool {
        self.family == other.family
            && self.prefix <= other.prefix
            && self.contains_bits(other.base)
    }

    pub fn to_ipnet(&self) -> IpNet {
        // Both prefix lengths are bounded by construction
        IpNet::new(self.network(), self.prefix_len()).unwrap_or_else(|_| IpNet::from(self.network()))
    }

    pub(crate) fn base_bits(&self) -> u128 {
        self.base
    }

    pub(crate) fn last_bits(&self) -> u128 {
        self.base | !mask(self.prefix)
    }

    pub(crate) fn contains_bits(&self, bits: u128) -> bool {
        bits & mask(self.prefix) == self.base
    }

    fn to_addr(&self, bits: u128) -> IpAddr {
        match self.family {
            Family::V4 => IpAddr::V4(Ipv4Addr::from(bits as u32)),
            Family::V6 => IpAddr::V6(Ipv6Addr::from(bits)),
        }
    }
}

/// Base ascending, then prefix descending: among subnets sharing a base the
/// widest one sorts last.
impl Ord for Subnet {
    fn cmp(&self, other: &Self) -> Ordering {
        self.base
            .cmp(&other.base)
            .then_with(|| other.prefix.cmp(&self.prefix))
            .then_with(|| self.family.cmp(&other.family))
    }
}

impl PartialOrd for Subnet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Subnet {
    type Err = ShortcutError;

    fn from_str(s: &str) -> Result<Self> {
        Subnet::parse(s)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix_len())
    }
}

impl From<IpNet> for Subnet {
    fn from(net: IpNet) -> Self {
        // IpNet guarantees a valid prefix length
        Subnet::new(net.addr(), net.prefix_len()).unwrap_or_else(|_| Subnet::host(net.addr()))
    }
}

impl From<IpAddr> for Subnet {
    fn from(addr: IpAddr) -> Self {
        Subnet::host(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_masks_host_bits() {
        let subnet = Subnet::parse("10.1.2.3/8").unwrap();
        assert_eq!(subnet.network(), ip("10.0.0.0"));
        assert_eq!(subnet.prefix_len(), 8);
        assert_eq!(subnet.to_string(), "10.0.0.0/8");
    }

    #[test]
    fn test_parse_ipv6() {
        let subnet = Subnet::parse("fe80::1/64").unwrap();
        assert_eq!(subnet.family(), Family::V6);
        assert_eq!(subnet.to_string(), "fe80::/64");
        assert_eq!(subnet.last(), ip("fe80::ffff:ffff:ffff:ffff"));
    }

    #[test]
    fn test_parse_bare_address() {
        let subnet = Subnet::parse("192.168.1.1").unwrap();
        assert_eq!(subnet.prefix_len(), 32);
        assert!(subnet.contains(ip("192.168.1.1")));
        assert!(!subnet.contains(ip("192.168.1.2")));

        let subnet = Subnet::parse("::1").unwrap();
        assert_eq!(subnet.prefix_len(), 128);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Subnet::parse("").is_err());
        assert!(Subnet::parse("not-a-cidr").is_err());
        assert!(Subnet::parse("1.2.3.4/33").is_err());
        assert!(Subnet::parse("::/129").is_err());
        assert!(Subnet::parse("1.2.3/24").is_err());
        assert!(Subnet::parse("/24").is_err());
    }

    #[test]
    fn test_new_rejects_long_prefix() {
        assert!(Subnet::new(ip("10.0.0.0"), 33).is_err());
        assert!(Subnet::new(ip("::"), 128).is_ok());
    }

    #[test]
    fn test_boundaries() {
        let subnet = Subnet::parse("192.168.1.0/24").unwrap();
        assert_eq!(subnet.last(), ip("192.168.1.255"));
        assert!(subnet.contains(ip("192.168.1.0")));
        assert!(subnet.contains(ip("192.168.1.255")));
        assert!(!subnet.contains(ip("192.168.0.255")));
        assert!(!subnet.contains(ip("192.168.2.0")));
    }

    #[test]
    fn test_zero_prefix() {
        let all_v4 = Subnet::parse("0.0.0.0/0").unwrap();
        assert!(all_v4.contains(ip("255.255.255.255")));
        assert!(all_v4.contains(ip("0.0.0.0")));
        assert!(!all_v4.contains(ip("2001:db8::1")));

        let all_v6 = Subnet::parse("::/0").unwrap();
        assert!(all_v6.contains(ip("2001:db8::1")));
        assert!(!all_v6.contains(ip("1.2.3.4")));
    }

    #[test]
    fn test_family_isolation_for_mapped_addresses() {
        let v4 = Subnet::parse("127.0.0.0/8").unwrap();
        assert!(v4.contains(ip("::ffff:127.0.0.1")));

        let v6 = Subnet::parse("::ffff:0:0/96").unwrap();
        assert!(!v6.contains(ip("127.0.0.1")));
        assert!(!v6.contains(ip("::ffff:127.0.0.1")));
    }

    #[test]
    fn test_contains_subnet() {
        let wide = Subnet::parse("1.1.4.0/22").unwrap();
        let narrow = Subnet::parse("1.1.4.0/24").unwrap();
        assert!(wide.contains_subnet(&narrow));
        assert!(!narrow.contains_subnet(&wide));
        assert!(wide.contains_subnet(&wide));
    }

    #[test]
    fn test_ordering_widest_last_on_equal_base() {
        let mut subnets = vec![
            Subnet::parse("1.1.4.0/22").unwrap(),
            Subnet::parse("1.1.8.0/24").unwrap(),
            Subnet::parse("1.1.4.0/24").unwrap(),
            Subnet::parse("1.0.0.0/8").unwrap(),
        ];
        subnets.sort();
        let rendered: Vec<String> = subnets.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["1.0.0.0/8", "1.1.4.0/24", "1.1.4.0/22", "1.1.8.0/24"]
        );
    }

    #[test]
    fn test_ipv4_sorts_consistently_with_ipv6() {
        let v4 = Subnet::parse("255.255.255.0/24").unwrap();
        let v6 = Subnet::parse("2001:db8::/32").unwrap();
        assert!(v4 < v6);
    }

    #[test]
    fn test_to_ipnet() {
        let subnet = Subnet::parse("10.0.0.7/24").unwrap();
        assert_eq!(subnet.to_ipnet(), "10.0.0.0/24".parse::<IpNet>().unwrap());
        let back = Subnet::from(subnet.to_ipnet());
        assert_eq!(back, subnet);
    }

    #[test]
    fn test_family_of() {
        assert_eq!(Family::of(ip("1.2.3.4")), Family::V4);
        assert_eq!(Family::of(ip("::ffff:1.2.3.4")), Family::V4);
        assert_eq!(Family::of(ip("::1")), Family::V6);
    }
}
