//! Addresses and connection identifiers.
//!
//! The engine is family-agnostic: frames may arrive over IPv4 or IPv6 and a
//! connection is identified by its local and remote [`Endpoint`] pair.

use std::fmt::{self, Display};

/// A four-octet IPv4 address in network order.
#[derive(Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct Ipv4Address(pub [u8; 4]);

impl Ipv4Address {
    pub const fn new(octets: [u8; 4]) -> Self {
        Self(octets)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl From<[u8; 4]> for Ipv4Address {
    fn from(octets: [u8; 4]) -> Self {
        Self(octets)
    }
}

/// A sixteen-octet IPv6 address in network order.
#[derive(Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct Ipv6Address(pub [u8; 16]);

impl Ipv6Address {
    pub const fn new(octets: [u8; 16]) -> Self {
        Self(octets)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Ipv6Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pair) in self.0.chunks(2).enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:x}", u16::from_be_bytes([pair[0], pair[1]]))?;
        }
        Ok(())
    }
}

impl From<[u8; 16]> for Ipv6Address {
    fn from(octets: [u8; 16]) -> Self {
        Self(octets)
    }
}

/// An IP address of either family.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Address {
    Ipv4(Ipv4Address),
    Ipv6(Ipv6Address),
}

impl Address {
    pub const fn is_ipv6(&self) -> bool {
        matches!(self, Address::Ipv6(_))
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(address) => write!(f, "{address}"),
            Address::Ipv6(address) => write!(f, "{address}"),
        }
    }
}

impl From<Ipv4Address> for Address {
    fn from(address: Ipv4Address) -> Self {
        Address::Ipv4(address)
    }
}

impl From<Ipv6Address> for Address {
    fn from(address: Ipv6Address) -> Self {
        Address::Ipv6(address)
    }
}

impl From<[u8; 4]> for Address {
    fn from(octets: [u8; 4]) -> Self {
        Address::Ipv4(octets.into())
    }
}

impl From<[u8; 16]> for Address {
    fn from(octets: [u8; 16]) -> Self {
        Address::Ipv6(octets.into())
    }
}

/// An address and port pair, one side of a connection.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct Endpoint {
    pub address: Address,
    pub port: u16,
}

impl Endpoint {
    pub const fn new(address: Address, port: u16) -> Self {
        Self { address, port }
    }

    pub const fn v4(octets: [u8; 4], port: u16) -> Self {
        Self {
            address: Address::Ipv4(Ipv4Address::new(octets)),
            port,
        }
    }

    pub const fn v6(octets: [u8; 16], port: u16) -> Self {
        Self {
            address: Address::Ipv6(Ipv6Address::new(octets)),
            port,
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// The local and remote endpoints that identify a connection.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct ConnectionId {
    pub local: Endpoint,
    pub remote: Endpoint,
}

impl ConnectionId {
    pub const fn new(local: Endpoint, remote: Endpoint) -> Self {
        Self { local, remote }
    }

    /// The same connection as seen from the other end.
    pub const fn reverse(self) -> Self {
        Self {
            local: self.remote,
            remote: self.local,
        }
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.local, self.remote)
    }
}
