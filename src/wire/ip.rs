use core::fmt;

use crate::wire::ipv4::Address;

/// Transport protocol numbers as they appear in the IPv4 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
}

impl From<Protocol> for u8 {
    fn from(value: Protocol) -> u8 {
        match value {
            Protocol::Tcp => 6,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
        }
    }
}

/// An IPv4 address with a port.
///
/// Either half may be a wildcard: the unspecified address, or port zero.
/// A fully wild endpoint is how a listener describes the peers it will
/// take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: Address,
    pub port: u16,
}

impl Default for Endpoint {
    fn default() -> Endpoint {
        Endpoint::UNSPECIFIED
    }
}

impl Endpoint {
    pub const UNSPECIFIED: Endpoint = Endpoint {
        addr: Address::UNSPECIFIED,
        port: 0,
    };

    pub const fn new(addr: Address, port: u16) -> Endpoint {
        Endpoint { addr, port }
    }

    /// Whether both halves are concrete.
    pub fn is_specified(&self) -> bool {
        !self.addr.is_unspecified() && self.port != 0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

impl From<(Address, u16)> for Endpoint {
    fn from((addr, port): (Address, u16)) -> Endpoint {
        Endpoint { addr, port }
    }
}

pub mod checksum {
    use byteorder::{ByteOrder, NetworkEndian};

    use super::*;

    const fn propagate_carries(word: u32) -> u16 {
        let sum = (word >> 16) + (word & 0xffff);
        ((sum >> 16) as u16) + (sum as u16)
    }

    /// Compute an RFC 1071 compliant checksum (without the final
    /// complement). The trailing odd octet, if any, is zero-padded.
    pub fn data(mut data: &[u8]) -> u16 {
        let mut accum = 0;

        while data.len() >= 2 {
            accum += NetworkEndian::read_u16(data) as u32;
            data = &data[2..];
        }

        if let Some(&value) = data.first() {
            accum += (value as u32) << 8;
        }

        propagate_carries(accum)
    }

    /// Combine several RFC 1071 compliant checksums.
    pub fn combine(checksums: &[u16]) -> u16 {
        let mut accum: u32 = 0;
        for &word in checksums {
            accum += word as u32;
        }
        propagate_carries(accum)
    }

    /// The IPv4 pseudo header: source, destination, a zero octet, the
    /// protocol number and the transport segment length.
    pub fn pseudo_header(
        src_addr: &Address,
        dst_addr: &Address,
        protocol: Protocol,
        length: u32,
    ) -> u16 {
        let mut proto_len = [0u8; 4];
        proto_len[1] = protocol.into();
        NetworkEndian::write_u16(&mut proto_len[2..4], length as u16);

        combine(&[
            data(&src_addr.octets()),
            data(&dst_addr.octets()),
            data(&proto_len[..]),
        ])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn checksum_data() {
        assert_eq!(checksum::data(&[]), 0);
        assert_eq!(checksum::data(&[0x12, 0x34]), 0x1234);
        // Odd tail is padded with a zero octet.
        assert_eq!(checksum::data(&[0x12, 0x34, 0x56]), 0x1234 + 0x5600);
        // End-around carry.
        assert_eq!(checksum::data(&[0xff, 0xff, 0x00, 0x02]), 0x0001);
    }

    #[test]
    fn checksum_combine() {
        assert_eq!(checksum::combine(&[0x1234, 0x4321]), 0x5555);
        assert_eq!(checksum::combine(&[0xffff, 0x0001]), 0x0001);
    }

    #[test]
    fn pseudo_header_proto_and_len() {
        let src = Address::new(10, 0, 2, 20);
        let dst = Address::new(10, 0, 2, 21);
        let sum = checksum::pseudo_header(&src, &dst, Protocol::Tcp, 20);
        let by_hand = checksum::combine(&[
            0x0a00,
            0x0214,
            0x0a00,
            0x0215,
            0x0006, // zero, protocol
            0x0014, // TCP length
        ]);
        assert_eq!(sum, by_hand);
    }

    #[test]
    fn endpoint_wildcards() {
        assert!(!Endpoint::UNSPECIFIED.is_specified());
        assert!(!Endpoint::new(Address::UNSPECIFIED, 80).is_specified());
        assert!(!Endpoint::new(Address::new(10, 0, 2, 20), 0).is_specified());
        assert!(Endpoint::new(Address::new(10, 0, 2, 20), 80).is_specified());
    }
}
