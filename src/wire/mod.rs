/*! Low-level packet access and construction.

The `wire` module deals with the segment *representation*. It provides two
levels of functionality.

 * First, it provides functions to extract fields from sequences of octets,
   and to insert fields into sequences of octets. This happens through the
   `Packet` family of structures, e.g. [TcpPacket].
 * Second, in cases where the space of valid field values is much smaller
   than the space of possible field values, it provides a compact,
   high-level representation of packet data that can be parsed from and
   emitted into a sequence of octets. This happens through the `Repr`
   family of structs, e.g. [TcpRepr].

The `Packet` family of data structures guarantees that, if the
`Packet::check_len()` method returned `Ok(())`, then no accessor or setter
method will panic. `Packet::new_checked` is a shorthand for a combination
of `Packet::new_unchecked` and `Packet::check_len`; parsing untrusted
input *must* go through it.

[TcpPacket]: struct.TcpPacket.html
[TcpRepr]: struct.TcpRepr.html
*/

mod field {
    pub type Field = ::core::ops::Range<usize>;
}

use core::fmt;

pub(crate) mod ip;
pub use self::ip::{checksum, Endpoint as IpEndpoint, Protocol as IpProtocol};

pub(crate) mod ipv4;
pub use self::ipv4::{Address as Ipv4Address, ADDR_SIZE as IPV4_ADDR_SIZE};

mod tcp;
pub use self::tcp::{
    Control as TcpControl, Packet as TcpPacket, Repr as TcpRepr, SeqNumber as TcpSeqNumber,
    HEADER_LEN as TCP_HEADER_LEN, MAX_HEADER_LEN as TCP_MAX_HEADER_LEN,
};

/// Parsing a packet failed.
///
/// Either it is malformed, or it is not supported by ktcp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error;

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire::Error")
    }
}

pub type Result<T> = core::result::Result<T, Error>;
