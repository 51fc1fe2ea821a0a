//! Compile-time tunables.
//!
//! Everything time-based is expressed in TCP clock ticks; the host drives
//! [crate::tcp::Tcp::tick] at `TCP_HZ` per second.

/// TCP clock rate, in ticks per second.
pub const TCP_HZ: u32 = 4;

/// Lower bound on the retransmission timeout (RFC 2988: 1 second).
pub const RTO_MIN: u32 = TCP_HZ;

/// Upper bound on the retransmission timeout.
pub const RTO_MAX: u32 = 64 * TCP_HZ;

/// Initial timeout for SYN and SYN-ACK retransmission.
pub const SYN_RTO: u32 = 15 * TCP_HZ;

/// Maximum segment lifetime; TIME_WAIT holds a TCB for twice this.
pub const TCP_MSL: u32 = 30 * TCP_HZ;

/// Delayed-ACK holdoff.
pub const ACK_DELAY: u32 = 1;

/// Consecutive retransmission timeouts tolerated on an established
/// connection before it is dropped with ETIMEDOUT.
pub const MAX_DATA_RETRIES: u32 = 5;

/// SYN/SYN-ACK retransmissions attempted before ECONNABORTED.
pub const MAX_SYN_RETRIES: u32 = 5;

/// Per-connection send buffer capacity, in bytes.
pub const SND_BUFFER_SIZE: usize = 16384;

/// Per-connection receive buffer capacity, in bytes. The free part of
/// this buffer is the window the connection offers its peer.
pub const RCV_BUFFER_SIZE: usize = 8192;

/// Segment size assumed for a peer that sent no MSS option (RFC 1122).
pub const DEFAULT_MSS: usize = 536;

/// Clamp peer MSS options below [DEFAULT_MSS] up to it. Off by default:
/// a peer asking for less gets less.
pub const CLAMP_PEER_MSS: bool = false;

/// First port handed out when binding to port zero.
pub const EPHEMERAL_PORT_FIRST: u16 = 49152;

/// Hard cap on live TCBs, listeners and TIME_WAIT remnants included.
pub const TCP_MAX_SOCKET_COUNT: usize = 64;

/// Hard cap on any single listener's accept backlog.
pub const TCP_MAX_BACKLOG: usize = 16;

/// Octets reserved in front of every outgoing segment for the headers the
/// layers below prepend: 14 for the link header, 20 for the IPv4 header.
pub const HEADROOM: usize = 14 + 20;

/// Bytes the IPv4 + TCP headers take out of the MTU when deriving a
/// segment size.
pub const IP_TCP_HEADER_SIZE: usize = 40;
