//! Error type of the transport core and its mapping onto the errno
//! numbers the host OS hands to user programs.
//!
//! Internally everything is `Result<T, Error>`; the numeric codes exist
//! only at the socket boundary, where [Error::errno] translates. Wire
//! parse failures use the separate [crate::wire::Error] and never
//! surface: malformed segments are dropped where they are decoded.

use thiserror::Error;

/// Errno values of the host OS. Negative, as the kernel returns them.
pub mod errno {
    pub const EAGAIN: i32 = -106;
    pub const EINVAL: i32 = -107;
    pub const ENOSPC: i32 = -117;
    pub const EISDIR: i32 = -130;
    pub const EADDRINUSE: i32 = -135;
    pub const ENOTCONN: i32 = -136;
    pub const ETIMEDOUT: i32 = -137;
    pub const ECONNRESET: i32 = -141;
    pub const ECONNREFUSED: i32 = -142;
    pub const ECONNABORTED: i32 = -143;
}

/// Errors produced by the transport core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The operation cannot complete now; retry after the state changes.
    #[error("operation would block")]
    Again,
    /// A bad argument, or an operation invalid in the current state.
    #[error("invalid argument")]
    Invalid,
    /// The requested local address is taken.
    #[error("address already in use")]
    AddrInUse,
    /// The socket was never connected.
    #[error("not connected")]
    NotConnected,
    /// Retransmission gave up on an established connection.
    #[error("connection timed out")]
    TimedOut,
    /// The peer reset the connection.
    #[error("connection reset by peer")]
    ConnReset,
    /// The peer reset our connection attempt.
    #[error("connection refused")]
    ConnRefused,
    /// Connection establishment ran out of retries.
    #[error("connection aborted")]
    ConnAborted,
    /// A message buffer could not be allocated.
    #[error("out of memory")]
    NoMem,
}

impl Error {
    /// The errno a user program sees for this error.
    ///
    /// Allocation failure is not an errno of its own: an outbound path
    /// that cannot allocate reports EAGAIN and the caller retries.
    pub const fn errno(self) -> i32 {
        match self {
            Error::Again => errno::EAGAIN,
            Error::Invalid => errno::EINVAL,
            Error::AddrInUse => errno::EADDRINUSE,
            Error::NotConnected => errno::ENOTCONN,
            Error::TimedOut => errno::ETIMEDOUT,
            Error::ConnReset => errno::ECONNRESET,
            Error::ConnRefused => errno::ECONNREFUSED,
            Error::ConnAborted => errno::ECONNABORTED,
            Error::NoMem => errno::EAGAIN,
        }
    }

    /// Whether the error sticks to the connection rather than describing
    /// the current call only.
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            Error::TimedOut | Error::ConnReset | Error::ConnRefused | Error::ConnAborted
        )
    }
}

pub type Result<T> = core::result::Result<T, Error>;
