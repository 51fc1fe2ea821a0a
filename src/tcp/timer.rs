//! Per-connection timers.
//!
//! Timers are pure data: countdowns in ticks, zero meaning disarmed.
//! [crate::tcp::Tcp::tick] decrements them and turns zero crossings into
//! [Fired] events the owning handler consumes in the same call; nothing
//! ever runs as an asynchronous callback against a connection.

use crate::time::Ticks;

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Timers {
    /// Retransmission of the segment at the left window edge.
    pub retransmit: Ticks,
    /// Zero-window probing. Never armed together with `retransmit`.
    pub persist: Ticks,
    /// Pending acknowledgement holdoff.
    pub delayed_ack: Ticks,
    /// Lifetime of a TIME_WAIT remnant.
    pub time_wait: Ticks,
    /// SYN/SYN-ACK retransmission during connection establishment.
    pub conn: Ticks,
}

/// Zero crossings produced by one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fired {
    pub retransmit: bool,
    pub persist: bool,
    pub delayed_ack: bool,
    pub time_wait: bool,
    pub conn: bool,
}

impl Fired {
    pub fn any(&self) -> bool {
        self.retransmit || self.persist || self.delayed_ack || self.time_wait || self.conn
    }
}

impl Timers {
    pub fn new() -> Timers {
        Timers::default()
    }

    fn step(countdown: &mut Ticks) -> bool {
        if countdown.is_zero() {
            return false;
        }
        countdown.0 -= 1;
        countdown.is_zero()
    }

    /// Advance every armed timer by one tick.
    pub fn tick(&mut self) -> Fired {
        debug_assert!(
            self.retransmit.is_zero() || self.persist.is_zero(),
            "retransmit and persist timers are mutually exclusive"
        );
        Fired {
            retransmit: Self::step(&mut self.retransmit),
            persist: Self::step(&mut self.persist),
            delayed_ack: Self::step(&mut self.delayed_ack),
            time_wait: Self::step(&mut self.time_wait),
            conn: Self::step(&mut self.conn),
        }
    }

    /// Disarm everything but the TIME_WAIT countdown.
    pub fn cancel_activity(&mut self) {
        self.retransmit = Ticks::ZERO;
        self.persist = Ticks::ZERO;
        self.delayed_ack = Ticks::ZERO;
        self.conn = Ticks::ZERO;
    }
}
