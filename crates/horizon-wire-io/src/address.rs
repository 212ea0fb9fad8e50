//! IP addresses and host/port pairs.
//!
//! [`IpAddress`] stores every address as 128 bits. IPv4 addresses are kept in
//! their IPv4-mapped IPv6 form (`::ffff:a.b.c.d`), so one type covers both
//! families and compares consistently.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;

use crate::error::NetworkError;

/// Upper 96 bits of an IPv4-mapped address.
const V4_MAPPED_PREFIX: u128 = 0xffff;

/// A 128-bit IP address, either native IPv6 or IPv4-mapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IpAddress(u128);

impl IpAddress {
    /// The IPv6 unspecified address `::`.
    pub const UNSPECIFIED: Self = Self(0);
    /// `127.0.0.1`.
    pub const LOCALHOST_V4: Self = Self::from_ipv4_octets([127, 0, 0, 1]);
    /// `::1`.
    pub const LOCALHOST_V6: Self = Self(1);
    /// `255.255.255.255`.
    pub const BROADCAST_V4: Self = Self::from_ipv4_octets([255, 255, 255, 255]);
    /// `0.0.0.0`, in mapped form.
    pub const ANY_V4: Self = Self::from_ipv4_octets([0, 0, 0, 0]);

    /// Build an address from its raw 128-bit value.
    pub const fn from_bits(bits: u128) -> Self {
        Self(bits)
    }

    /// The raw 128-bit value.
    pub const fn to_bits(self) -> u128 {
        self.0
    }

    /// Build an IPv4-mapped address.
    pub const fn from_ipv4_octets(octets: [u8; 4]) -> Self {
        Self((V4_MAPPED_PREFIX << 32) | u32::from_be_bytes(octets) as u128)
    }

    /// Build an address from 16 network-order bytes.
    pub const fn from_ipv6_octets(octets: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(octets))
    }

    /// Network-order bytes of the 128-bit form.
    pub const fn octets(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    /// Whether this is an IPv4 address (the upper 96 bits are `0:0:ffff`).
    pub const fn is_ipv4(self) -> bool {
        self.0 >> 32 == V4_MAPPED_PREFIX
    }

    /// The IPv4 address, if this is an IPv4-mapped value.
    pub fn to_ipv4(self) -> Option<Ipv4Addr> {
        self.is_ipv4().then(|| Ipv4Addr::from(self.0 as u32))
    }

    /// Convert to the standard library representation, unmapping IPv4.
    pub fn to_ip_addr(self) -> IpAddr {
        match self.to_ipv4() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(Ipv6Addr::from(self.0)),
        }
    }

    /// The address as an IPv6 value; IPv4 addresses stay in mapped form.
    pub fn to_ipv6(self) -> Ipv6Addr {
        Ipv6Addr::from(self.0)
    }

    /// Whether this is `::` or `0.0.0.0`.
    pub fn is_unspecified(self) -> bool {
        self == Self::UNSPECIFIED || self == Self::ANY_V4
    }

    /// Whether this is a loopback address of either family.
    pub fn is_loopback(self) -> bool {
        self.to_ip_addr().is_loopback()
    }
}

impl From<Ipv4Addr> for IpAddress {
    fn from(addr: Ipv4Addr) -> Self {
        Self::from_ipv4_octets(addr.octets())
    }
}

impl From<Ipv6Addr> for IpAddress {
    fn from(addr: Ipv6Addr) -> Self {
        Self::from_ipv6_octets(addr.octets())
    }
}

impl From<IpAddr> for IpAddress {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => v4.into(),
            IpAddr::V6(v6) => v6.into(),
        }
    }
}

impl From<IpAddress> for IpAddr {
    fn from(addr: IpAddress) -> Self {
        addr.to_ip_addr()
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_ip_addr(), f)
    }
}

impl FromStr for IpAddress {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<IpAddr>()
            .map(Self::from)
            .map_err(|_| NetworkError::InvalidAddress(s.to_string()))
    }
}

/// An address and port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Host {
    /// The IP address.
    pub address: IpAddress,
    /// The port, in host byte order.
    pub port: u16,
}

impl Host {
    /// Create a host from an address and port.
    pub const fn new(address: IpAddress, port: u16) -> Self {
        Self { address, port }
    }

    /// Convert to a socket address; IPv4-mapped addresses become `SocketAddr::V4`.
    pub fn to_socket_addr(self) -> SocketAddr {
        match self.address.to_ipv4() {
            Some(v4) => SocketAddr::V4(SocketAddrV4::new(v4, self.port)),
            None => SocketAddr::V6(SocketAddrV6::new(self.address.to_ipv6(), self.port, 0, 0)),
        }
    }

    /// Convert to an IPv6 socket address, keeping IPv4 in mapped form.
    ///
    /// Dual-stack sockets need this form to reach IPv4 peers.
    pub fn to_socket_addr_v6(self) -> SocketAddr {
        SocketAddr::V6(SocketAddrV6::new(self.address.to_ipv6(), self.port, 0, 0))
    }
}

impl From<SocketAddr> for Host {
    fn from(addr: SocketAddr) -> Self {
        let address = match addr {
            // Mapped peers seen on dual-stack sockets collapse to the same value.
            SocketAddr::V6(v6) => IpAddress::from(*v6.ip()),
            SocketAddr::V4(v4) => IpAddress::from(*v4.ip()),
        };
        Self::new(address, addr.port())
    }
}

impl From<Host> for SocketAddr {
    fn from(host: Host) -> Self {
        host.to_socket_addr()
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_socket_addr(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_is_mapped() {
        let addr = IpAddress::from(Ipv4Addr::new(93, 184, 216, 34));
        assert!(addr.is_ipv4());
        assert_eq!(addr.to_bits() >> 32, 0xffff);
        assert_eq!(addr.to_ipv4(), Some(Ipv4Addr::new(93, 184, 216, 34)));
        assert_eq!(addr.to_string(), "93.184.216.34");
    }

    #[test]
    fn test_ipv6_is_not_ipv4() {
        let addr: IpAddress = "2606:2800:220:1::".parse().unwrap();
        assert!(!addr.is_ipv4());
        assert_eq!(addr.to_ipv4(), None);
        assert!(!IpAddress::UNSPECIFIED.is_ipv4());
        assert!(!IpAddress::LOCALHOST_V6.is_ipv4());
    }

    #[test]
    fn test_mapped_text_parses_as_ipv4() {
        let mapped: IpAddress = "::ffff:10.0.0.1".parse().unwrap();
        let plain: IpAddress = "10.0.0.1".parse().unwrap();
        assert_eq!(mapped, plain);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            "not-an-ip".parse::<IpAddress>(),
            Err(NetworkError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_host_socket_addr_conversion() {
        let host = Host::new(IpAddress::LOCALHOST_V4, 53);
        assert_eq!(host.to_socket_addr(), "127.0.0.1:53".parse().unwrap());
        assert_eq!(host.to_socket_addr_v6(), "[::ffff:127.0.0.1]:53".parse().unwrap());
        assert_eq!(Host::from(host.to_socket_addr_v6()), host);
        assert_eq!(host.to_string(), "127.0.0.1:53");
    }

    #[test]
    fn test_loopback_and_unspecified() {
        assert!(IpAddress::LOCALHOST_V4.is_loopback());
        assert!(IpAddress::LOCALHOST_V6.is_loopback());
        assert!(IpAddress::ANY_V4.is_unspecified());
        assert!(IpAddress::default().is_unspecified());
    }
}
