/*! An IPv4 TCP transport for hosted kernels.

`ktcp` implements the TCP state machine of RFC 793 with the RFC 1122
amendments, congestion control per RFC 5681 and retransmission timing per
RFC 2988, behind a small BSD-style socket facade. It does not own a network
interface: the IP layer below it and the timer/clock sources that drive it
are supplied by the host through the traits in [iface].

The crate is split the same way the packet path is:

 * [wire] packs and unpacks the TCP header and computes the pseudo-header
   checksum.
 * [pkbuf] carries segments between the layers, keeping headroom for the
   link and network headers the host prepends.
 * [tcp] holds the transmission control blocks, the input state machine,
   the output scheduler and the timers; [Tcp::rx] and [Tcp::tick] are the
   two entry points the host calls.
 * [socket] is the user-facing surface: `create`/`bind`/`listen`/`connect`
   and friends, returning the errno values of the host OS.

[Tcp::rx]: tcp::Tcp::rx
[Tcp::tick]: tcp::Tcp::tick
*/

#[macro_use]
mod macros;

pub mod config;
pub mod error;
pub mod iface;
pub mod parsers;
pub mod pkbuf;
pub mod socket;
pub mod storage;
pub mod tcp;
pub mod time;
pub mod wire;

pub use self::error::{Error, Result};
pub use self::iface::{Clock, IpLayer};
pub use self::pkbuf::NetMsg;
pub use self::socket::{SockAddrIn, TcpSocket};
pub use self::tcp::{State, Tcp};
