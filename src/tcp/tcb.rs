//! The transmission control block.

use core::fmt;
use std::sync::{Arc, Mutex, Weak};

use heapless::Deque;

use crate::config::{
    RCV_BUFFER_SIZE, SND_BUFFER_SIZE, TCP_MAX_BACKLOG, TCP_MSL,
};
use crate::error::Error;
use crate::storage::RingBuffer;
use crate::tcp::congestion::Congestion;
use crate::tcp::rtt::RttEstimator;
use crate::tcp::timer::Timers;
use crate::time::Ticks;
use crate::wire::ip::Endpoint;
use crate::wire::TcpSeqNumber;

/// A shared handle on a connection: one held by the table, one by the
/// socket facade, and one per backlog slot while a child waits to be
/// accepted.
pub(crate) type TcbRef = Arc<Mutex<Tcb>>;

/// Connection state per RFC 793.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    LastAck,
    Closing,
    TimeWait,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            State::Closed => write!(f, "CLOSED"),
            State::Listen => write!(f, "LISTEN"),
            State::SynSent => write!(f, "SYN-SENT"),
            State::SynReceived => write!(f, "SYN-RECEIVED"),
            State::Established => write!(f, "ESTABLISHED"),
            State::FinWait1 => write!(f, "FIN-WAIT-1"),
            State::FinWait2 => write!(f, "FIN-WAIT-2"),
            State::CloseWait => write!(f, "CLOSE-WAIT"),
            State::LastAck => write!(f, "LAST-ACK"),
            State::Closing => write!(f, "CLOSING"),
            State::TimeWait => write!(f, "TIME-WAIT"),
        }
    }
}

/// The four-tuple identifying a connection. Either half of `foreign`,
/// and the address of `local`, may be wildcards on a listener.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quad {
    pub local: Endpoint,
    pub foreign: Endpoint,
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}<->{}", self.local, self.foreign)
    }
}

/// Passive-open state: the accept queue of a listener.
#[derive(Debug)]
pub(crate) struct Listener {
    pub backlog: Deque<TcbRef, TCP_MAX_BACKLOG>,
    pub max_backlog: usize,
}

type SocketBuffer = RingBuffer<'static, u8>;

#[derive(Debug)]
pub(crate) struct Tcb {
    pub quad: Quad,
    pub state: State,

    // Send sequence space.
    pub snd_una: TcpSeqNumber,
    pub snd_nxt: TcpSeqNumber,
    /// Highest sequence number ever sent; everything in
    /// `[snd_una, snd_max)` is a retransmission if sent again.
    pub snd_max: TcpSeqNumber,
    pub snd_wnd: usize,
    /// Sequence number of the segment that last updated `snd_wnd`;
    /// older segments must not shrink the window.
    pub snd_wl1: TcpSeqNumber,
    /// Largest window the peer ever offered.
    pub max_wnd: usize,
    pub iss: TcpSeqNumber,

    // Receive sequence space.
    pub rcv_nxt: TcpSeqNumber,
    pub irs: TcpSeqNumber,
    /// Right edge `rcv_nxt + window` of the last advertisement; it only
    /// ever moves forward, in jumps worth advertising.
    pub adv_right_edge: TcpSeqNumber,

    /// Payload bytes per outgoing segment: the peer's MSS option capped
    /// by what the local interface carries.
    pub smss: usize,
    /// The MSS option we put in a SYN or SYN-ACK.
    pub mss_to_advertise: u16,

    pub rtte: RttEstimator,
    pub cc: Congestion,
    pub timers: Timers,

    pub tx_buffer: SocketBuffer,
    pub rx_buffer: SocketBuffer,

    /// The user closed the sending side; a FIN follows the queued data.
    pub fin_queued: bool,
    /// Sequence number our FIN occupies, once it has been transmitted.
    pub fin_seq: Option<TcpSeqNumber>,
    /// The peer's FIN was received (its sequence number is consumed).
    pub rx_fin: bool,

    pub bound: bool,
    /// The connection reached ESTABLISHED at some point.
    pub connected: bool,
    /// Sticky failure surfaced to every later user call.
    pub error: Option<Error>,

    /// Consecutive retransmission timeouts.
    pub retries: u32,
    /// SYN or SYN-ACK (re)transmissions so far.
    pub syn_retries: u32,
    /// Current persist interval, doubled per probe.
    pub persist_backoff: Ticks,

    pub listener: Option<Box<Listener>>,
    /// Back-reference a queued child keeps so its slot can be returned;
    /// weak, to keep the parent-child graph acyclic.
    pub parent: Option<Weak<Mutex<Tcb>>>,
}

impl Tcb {
    /// A fresh closed block. Buffers get allocated when the block leaves
    /// CLOSED/LISTEN for an actual connection.
    pub fn new() -> Tcb {
        Tcb {
            quad: Quad::default(),
            state: State::Closed,
            snd_una: TcpSeqNumber(0),
            snd_nxt: TcpSeqNumber(0),
            snd_max: TcpSeqNumber(0),
            snd_wnd: 0,
            snd_wl1: TcpSeqNumber(0),
            max_wnd: 0,
            iss: TcpSeqNumber(0),
            rcv_nxt: TcpSeqNumber(0),
            irs: TcpSeqNumber(0),
            adv_right_edge: TcpSeqNumber(0),
            smss: crate::config::DEFAULT_MSS,
            mss_to_advertise: crate::config::DEFAULT_MSS as u16,
            rtte: RttEstimator::new(),
            cc: Congestion::new(crate::config::DEFAULT_MSS, TcpSeqNumber(0)),
            timers: Timers::new(),
            tx_buffer: RingBuffer::new(Vec::new()),
            rx_buffer: RingBuffer::new(Vec::new()),
            fin_queued: false,
            fin_seq: None,
            rx_fin: false,
            bound: false,
            connected: false,
            error: None,
            retries: 0,
            syn_retries: 0,
            persist_backoff: Ticks::ZERO,
            listener: None,
            parent: None,
        }
    }

    pub fn allocate_buffers(&mut self) {
        self.tx_buffer = RingBuffer::new(vec![0; SND_BUFFER_SIZE]);
        self.rx_buffer = RingBuffer::new(vec![0; RCV_BUFFER_SIZE]);
    }

    /// Seed the send sequence space from an initial sequence number.
    pub fn initialize_send(&mut self, iss: TcpSeqNumber) {
        self.iss = iss;
        self.snd_una = iss;
        self.snd_nxt = iss;
        self.snd_max = iss;
    }

    pub fn set_state(&mut self, state: State) {
        if state != self.state {
            net_debug!("tcp: {} state {} -> {}", self.quad, self.state, state);
        }
        self.state = state;
    }

    /// Free space in the receive buffer; this is RCV.WND.
    pub fn rcv_wnd(&self) -> usize {
        self.rx_buffer.window()
    }

    /// Bytes of sequence space in flight.
    pub fn flight_size(&self) -> usize {
        self.snd_nxt - self.snd_una
    }

    /// Our SYN occupies sequence space not yet acknowledged.
    pub fn syn_in_flight(&self) -> bool {
        self.snd_max > self.iss && self.snd_una == self.iss
    }

    /// Our FIN has been sent and not yet acknowledged.
    pub fn fin_in_flight(&self) -> bool {
        matches!(self.fin_seq, Some(fin) if fin >= self.snd_una)
    }

    /// The peer acknowledged our FIN.
    pub fn fin_acked(&self) -> bool {
        matches!(self.fin_seq, Some(fin) if fin < self.snd_una)
    }

    /// Payload bytes in flight: the flight size less any control flags
    /// occupying sequence space.
    pub fn data_in_flight(&self) -> usize {
        self.flight_size() - self.syn_in_flight() as usize - self.fin_in_flight() as usize
    }

    /// Bytes queued in the send buffer that have never been transmitted.
    pub fn unsent_data(&self) -> usize {
        self.tx_buffer.len() - self.data_in_flight()
    }

    /// How much the peer and the congestion window allow on top of what
    /// is already in flight.
    pub fn usable_window(&self) -> usize {
        self.snd_wnd
            .min(self.cc.window())
            .saturating_sub(self.flight_size())
    }

    /// The remote side is done and everything it sent was consumed.
    pub fn eof(&self) -> bool {
        self.rx_fin && self.rx_buffer.is_empty()
    }

    /// The window to put into an outgoing segment.
    ///
    /// Receiver-side silly-window avoidance: the advertised right edge
    /// never moves backward, and only moves forward in jumps of at least
    /// min(SMSS, half the buffer).
    pub fn window_to_advertise(&self) -> usize {
        let free = self.rx_buffer.window();
        let candidate = self.rcv_nxt + free;
        let gain = candidate - self.adv_right_edge;
        let window = if gain >= self.sws_threshold() {
            free
        } else {
            self.adv_right_edge - self.rcv_nxt
        };
        window.min(u16::MAX as usize)
    }

    fn sws_threshold(&self) -> usize {
        self.smss.min(self.rx_buffer.capacity() / 2).max(1)
    }

    /// Record what an outgoing segment advertised.
    pub fn note_advertised(&mut self, window: usize) {
        self.adv_right_edge = self.rcv_nxt + window;
    }

    /// A receive-buffer drain opened enough window that the peer should
    /// hear about it without waiting for the next data segment.
    pub fn window_update_due(&self) -> bool {
        if !self.connected || self.state == State::Closed {
            return false;
        }
        let candidate = self.rcv_nxt + self.rx_buffer.window();
        candidate - self.adv_right_edge >= self.sws_threshold()
    }

    /// Park the block in TIME_WAIT for two segment lifetimes.
    pub fn enter_time_wait(&mut self) {
        self.set_state(State::TimeWait);
        self.timers.cancel_activity();
        self.timers.time_wait = Ticks(2 * TCP_MSL);
    }

    /// Permanent failure: record it, flush everything, stop all timers.
    pub fn fail(&mut self, error: Error) {
        net_debug!("tcp: {} failed: {}", self.quad, error);
        self.error = Some(error);
        self.set_state(State::Closed);
        self.tx_buffer.clear();
        self.rx_buffer.clear();
        self.rx_fin = false;
        self.timers = Timers::new();
    }
}
