use core::fmt;

pub use core::net::Ipv4Addr as Address;

pub const ADDR_SIZE: usize = 4;

/// The wildcard address, INADDR_ANY in BSD terms.
pub const ANY: Address = Address::UNSPECIFIED;

pub(crate) trait AddressExt {
    /// Construct an IPv4 address from a sequence of octets, in big-endian.
    ///
    /// # Panics
    /// The function panics if `data` is not four octets long.
    fn from_bytes(data: &[u8]) -> Self;

    /// Whether the address can stand in for any local address.
    fn is_wildcard(&self) -> bool;
}

impl AddressExt for Address {
    fn from_bytes(data: &[u8]) -> Address {
        let mut bytes = [0; ADDR_SIZE];
        bytes.copy_from_slice(data);
        Address::from_bits(u32::from_be_bytes(bytes))
    }

    fn is_wildcard(&self) -> bool {
        self.is_unspecified()
    }
}

/// Formats like `inet_ntoa`; [Address] already renders dotted decimal, the
/// helper only exists to mirror the C-side name in call sites.
pub fn ntoa(addr: Address) -> impl fmt::Display {
    addr
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_bytes_round_trips() {
        let addr = Address::from_bytes(&[10, 0, 2, 20]);
        assert_eq!(addr, Address::new(10, 0, 2, 20));
        assert_eq!(addr.octets(), [10, 0, 2, 20]);
    }

    #[test]
    fn wildcard() {
        assert!(ANY.is_wildcard());
        assert!(!Address::new(127, 0, 0, 1).is_wildcard());
    }

    #[test]
    fn ntoa_round_trips() {
        let addr = Address::new(192, 168, 1, 10);
        assert_eq!(format!("{}", ntoa(addr)), "192.168.1.10");
        assert_eq!("192.168.1.10".parse::<Address>().unwrap(), addr);
    }
}
