//! The input processor.
//!
//! One segment, one run to completion: sequence acceptability, RST, SYN,
//! acknowledgement bookkeeping (estimator and congestion first, then the
//! buffers), segment text, FIN. Whatever the acknowledgement freed is
//! flushed out before the function returns, so a burst caused by an ACK
//! is on the wire before the next inbound segment is looked at.
//!
//! Handlers never touch the connection table; they describe removals and
//! insertions in the returned [Outcome] and the caller applies them once
//! the block's lock is released.

use std::sync::{Arc, Mutex, Weak};

use crate::config::{ACK_DELAY, CLAMP_PEER_MSS, DEFAULT_MSS, IP_TCP_HEADER_SIZE, SYN_RTO, TCP_MSL};
use crate::error::Error;
use crate::tcp::congestion::Congestion;
use crate::tcp::output;
use crate::tcp::seg;
use crate::tcp::tcb::{Quad, State, Tcb, TcbRef};
use crate::tcp::Tcp;
use crate::time::Ticks;
use crate::wire::ip::Endpoint;
use crate::wire::ipv4::{Address, AddressExt};
use crate::wire::{TcpControl, TcpRepr, TcpSeqNumber};

/// A decoded inbound segment with its network-layer addressing.
pub(crate) struct SegmentView<'a> {
    pub src_addr: Address,
    pub dst_addr: Address,
    pub repr: TcpRepr<'a>,
}

impl<'a> SegmentView<'a> {
    pub fn local(&self) -> Endpoint {
        Endpoint::new(self.dst_addr, self.repr.dst_port)
    }

    pub fn foreign(&self) -> Endpoint {
        Endpoint::new(self.src_addr, self.repr.src_port)
    }
}

/// Table mutations a handler asks for.
#[derive(Default)]
pub(crate) struct Outcome {
    /// Drop the table's reference on this block.
    pub remove: bool,
    /// A freshly created passive-open child to register.
    pub child: Option<TcbRef>,
    /// Return this block's slot in its listener's backlog.
    pub unlink: Option<Weak<Mutex<Tcb>>>,
}

impl Outcome {
    pub(crate) fn remove() -> Outcome {
        Outcome {
            remove: true,
            ..Default::default()
        }
    }
}

/// The segment size to use against a peer, from its MSS option and the
/// local interface MTU. A missing option means the RFC 1122 default; a
/// peer asking for less than that gets it, unless the clamp is on.
pub(crate) fn effective_mss(option: Option<u16>, mtu: usize) -> usize {
    let mut mss = option.map(usize::from).unwrap_or(DEFAULT_MSS);
    if CLAMP_PEER_MSS {
        mss = mss.max(DEFAULT_MSS);
    }
    mss.min(mtu.saturating_sub(IP_TCP_HEADER_SIZE)).max(1)
}

pub(crate) fn process(stack: &Tcp, tcb: &mut Tcb, self_ref: &TcbRef, seg: &SegmentView) -> Outcome {
    match tcb.state {
        State::Closed => {
            let _ = seg::reply_rst(stack, seg);
            Outcome::default()
        }
        State::Listen => on_listen(stack, tcb, self_ref, seg),
        State::SynSent => on_syn_sent(stack, tcb, seg),
        _ => on_common(stack, tcb, seg),
    }
}

fn on_listen(stack: &Tcp, tcb: &mut Tcb, self_ref: &TcbRef, seg: &SegmentView) -> Outcome {
    let repr = &seg.repr;

    if repr.control == TcpControl::Rst {
        return Outcome::default();
    }
    // A peer claiming the wildcard address cannot be answered.
    if seg.src_addr.is_wildcard() {
        return Outcome::default();
    }
    if repr.ack_number.is_some() {
        // Nothing this listener sent can be acknowledged.
        let _ = seg::reply_rst(stack, seg);
        return Outcome::default();
    }
    if repr.control != TcpControl::Syn {
        return Outcome::default();
    }

    let local_port = tcb.quad.local.port;
    let Some(listener) = tcb.listener.as_mut() else {
        return Outcome::default();
    };
    if listener.backlog.len() >= listener.max_backlog {
        net_debug!("tcp: port {} backlog full, dropping SYN", local_port);
        return Outcome::default();
    }

    let mtu = stack.ip().lock().unwrap().ip_get_mtu(seg.dst_addr);
    let mut child = Tcb::new();
    child.quad = Quad {
        // The child's local address is whatever the SYN was sent to.
        local: Endpoint::new(seg.dst_addr, local_port),
        foreign: seg.foreign(),
    };
    child.bound = true;
    child.allocate_buffers();
    child.mss_to_advertise = mtu.saturating_sub(IP_TCP_HEADER_SIZE).min(u16::MAX as usize) as u16;
    child.smss = effective_mss(repr.max_seg_size, mtu);

    let iss = stack.isn();
    child.initialize_send(iss);
    child.cc = Congestion::new(child.smss, iss);
    child.irs = repr.seq_number;
    child.rcv_nxt = repr.seq_number + 1;
    child.adv_right_edge = child.rcv_nxt;
    child.snd_wnd = repr.window_len as usize;
    child.max_wnd = child.snd_wnd;
    child.snd_wl1 = repr.seq_number;
    child.parent = Some(Arc::downgrade(self_ref));
    child.set_state(State::SynReceived);

    let _ = seg::send_syn(stack, &mut child, true);
    child.snd_nxt = iss + 1;
    child.snd_max = child.snd_nxt;
    child.timers.conn = Ticks(SYN_RTO);

    let child = Arc::new(Mutex::new(child));
    // The backlog slot keeps its own reference until accept or teardown.
    let _ = listener.backlog.push_back(child.clone());
    Outcome {
        child: Some(child),
        ..Default::default()
    }
}

fn on_syn_sent(stack: &Tcp, tcb: &mut Tcb, seg: &SegmentView) -> Outcome {
    let repr = &seg.repr;

    if let Some(ack) = repr.ack_number {
        if ack <= tcb.iss || ack > tcb.snd_max {
            if repr.control != TcpControl::Rst {
                let _ = seg::reply_rst(stack, seg);
            }
            return Outcome::default();
        }
        if repr.control == TcpControl::Rst {
            tcb.fail(Error::ConnRefused);
            return Outcome::remove();
        }
    } else if repr.control == TcpControl::Rst {
        // A reset acknowledging nothing proves nothing.
        return Outcome::default();
    }

    if repr.control != TcpControl::Syn {
        return Outcome::default();
    }

    tcb.irs = repr.seq_number;
    tcb.rcv_nxt = repr.seq_number + 1;
    tcb.adv_right_edge = tcb.rcv_nxt;
    tcb.snd_wnd = repr.window_len as usize;
    tcb.max_wnd = tcb.max_wnd.max(tcb.snd_wnd);
    tcb.snd_wl1 = repr.seq_number;

    match repr.ack_number {
        Some(ack) => {
            // Our SYN is acknowledged: up.
            tcb.snd_una = ack;
            let mtu = stack.ip().lock().unwrap().ip_get_mtu(tcb.quad.local.addr);
            tcb.smss = effective_mss(repr.max_seg_size, mtu);
            tcb.cc = Congestion::new(tcb.smss, tcb.iss);
            tcb.timers.conn = Ticks::ZERO;
            tcb.syn_retries = 0;
            tcb.connected = true;
            tcb.set_state(State::Established);
            let _ = seg::send_ack(stack, tcb);
            let _ = output::flush(stack, tcb);
        }
        None => {
            // Simultaneous open: acknowledge theirs, keep our ISS.
            tcb.set_state(State::SynReceived);
            let _ = seg::send_syn(stack, tcb, true);
            tcb.timers.conn = Ticks(SYN_RTO);
        }
    }
    Outcome::default()
}

/// RFC 793 acceptability: the segment must land in the receive window,
/// where a left-overlapping segment counts as long as its tail reaches
/// the window.
fn acceptable(tcb: &Tcb, seq: TcpSeqNumber, seg_len: usize) -> bool {
    let wnd = tcb.rcv_wnd();
    let nxt = tcb.rcv_nxt;
    if seg_len == 0 {
        if wnd == 0 {
            seq == nxt
        } else {
            nxt <= seq && seq < nxt + wnd
        }
    } else if wnd == 0 {
        false
    } else {
        let last = seq + (seg_len - 1);
        (nxt <= seq && seq < nxt + wnd) || (nxt <= last && last < nxt + wnd)
    }
}

fn on_common(stack: &Tcp, tcb: &mut Tcb, seg: &SegmentView) -> Outcome {
    let repr = &seg.repr;
    let seq = repr.seq_number;
    let seg_len = repr.segment_len();

    // First: sequence acceptability.
    if !acceptable(tcb, seq, seg_len) {
        if repr.control == TcpControl::Rst {
            return Outcome::default();
        }
        // A retransmitted FIN in TIME_WAIT restarts the 2*MSL clock.
        if tcb.state == State::TimeWait && repr.control == TcpControl::Fin {
            tcb.timers.time_wait = Ticks(2 * TCP_MSL);
        }
        let _ = seg::send_ack(stack, tcb);
        return Outcome::default();
    }

    // Second: RST.
    if repr.control == TcpControl::Rst {
        if tcb.state == State::SynReceived && tcb.parent.is_some() {
            // Passive child: hand the backlog slot back, quietly.
            let unlink = tcb.parent.clone();
            tcb.set_state(State::Closed);
            return Outcome {
                remove: true,
                unlink,
                ..Default::default()
            };
        }
        let error = if tcb.state == State::SynReceived {
            Error::ConnRefused
        } else {
            Error::ConnReset
        };
        tcb.fail(error);
        return Outcome::remove();
    }

    // Third: a SYN inside the window is an error.
    if repr.control == TcpControl::Syn {
        let _ = seg::reply_rst(stack, seg);
        let unlink = tcb.parent.clone();
        if unlink.is_none() {
            tcb.fail(Error::ConnReset);
        } else {
            tcb.set_state(State::Closed);
        }
        return Outcome {
            remove: true,
            unlink,
            ..Default::default()
        };
    }

    // Fourth: acknowledgement. Segments without one are dropped.
    let Some(ack) = repr.ack_number else {
        return Outcome::default();
    };

    if tcb.state == State::SynReceived {
        if tcb.snd_una < ack && ack <= tcb.snd_max {
            tcb.timers.conn = Ticks::ZERO;
            tcb.syn_retries = 0;
            tcb.connected = true;
            tcb.set_state(State::Established);
            tcb.snd_wnd = repr.window_len as usize;
            tcb.max_wnd = tcb.max_wnd.max(tcb.snd_wnd);
            tcb.snd_wl1 = seq;
        } else {
            let _ = seg::reply_rst(stack, seg);
            let unlink = tcb.parent.clone();
            if unlink.is_none() {
                tcb.fail(Error::ConnReset);
            } else {
                tcb.set_state(State::Closed);
            }
            return Outcome {
                remove: true,
                unlink,
                ..Default::default()
            };
        }
    }

    if ack > tcb.snd_max {
        // Acknowledges the future; tell the peer where we stand.
        let _ = seg::send_ack(stack, tcb);
        return Outcome::default();
    }

    if ack > tcb.snd_una {
        let acked = ack - tcb.snd_una;
        let syn_covered = tcb.syn_in_flight() && ack > tcb.iss;
        let fin_covered = matches!(tcb.fin_seq, Some(fin) if fin >= tcb.snd_una && ack > fin);
        let data_acked = acked - syn_covered as usize - fin_covered as usize;

        // Estimator and congestion run before the buffers drain.
        tcb.rtte.on_ack(ack);
        tcb.cc.on_new_ack(tcb.smss, data_acked, ack);
        tcb.tx_buffer.dequeue_allocated(data_acked);
        tcb.snd_una = ack;
        tcb.retries = 0;

        if tcb.flight_size() == 0 {
            tcb.timers.retransmit = Ticks::ZERO;
        } else {
            tcb.timers.retransmit = tcb.rtte.rto();
        }
    } else {
        let duplicate = ack == tcb.snd_una
            && seg_len == 0
            && repr.window_len as usize == tcb.snd_wnd
            && tcb.flight_size() > 0
            && tcb.timers.persist.is_zero();
        if duplicate
            && tcb
                .cc
                .on_duplicate_ack(tcb.smss, tcb.flight_size(), tcb.snd_max)
        {
            let _ = output::fast_retransmit(stack, tcb);
        }
    }

    // Window update, unless the carrier is older than the last one taken.
    if seq >= tcb.snd_wl1 {
        let window = repr.window_len as usize;
        tcb.snd_wnd = window;
        tcb.snd_wl1 = seq;
        tcb.max_wnd = tcb.max_wnd.max(window);
        if window > 0 && !tcb.timers.persist.is_zero() {
            tcb.timers.persist = Ticks::ZERO;
            tcb.persist_backoff = Ticks::ZERO;
        }
    }

    // Transitions driven by the acknowledgement of our FIN.
    match tcb.state {
        State::FinWait1 if tcb.fin_acked() => tcb.set_state(State::FinWait2),
        State::Closing if tcb.fin_acked() => tcb.enter_time_wait(),
        State::LastAck if tcb.fin_acked() => {
            tcb.set_state(State::Closed);
            return Outcome::remove();
        }
        _ => {}
    }

    // Fifth: segment text.
    if !repr.payload.is_empty() {
        match tcb.state {
            State::Established | State::FinWait1 | State::FinWait2 => {
                if seq <= tcb.rcv_nxt {
                    // In order, possibly overlapping what we have.
                    let offset = (tcb.rcv_nxt - seq).min(repr.payload.len());
                    let fresh = &repr.payload[offset..];
                    let accepted = tcb.rx_buffer.enqueue_slice(fresh);
                    tcb.rcv_nxt = tcb.rcv_nxt + accepted;
                    if accepted < fresh.len() {
                        // Out of buffer; the cut-off tail will come again.
                        let _ = seg::send_ack(stack, tcb);
                    } else if accepted > 0 {
                        if tcb.timers.delayed_ack.is_zero() {
                            tcb.timers.delayed_ack = Ticks(ACK_DELAY);
                        } else {
                            // Second in-order segment within the holdoff.
                            let _ = seg::send_ack(stack, tcb);
                        }
                    }
                } else {
                    // A hole in front of this data: duplicate ACK, now.
                    let _ = seg::send_ack(stack, tcb);
                }
            }
            _ => {
                // The peer already said FIN; text here can only be old.
            }
        }
    }

    // Sixth: FIN, only once everything in front of it has arrived.
    if repr.control == TcpControl::Fin && seq + repr.payload.len() == tcb.rcv_nxt && !tcb.rx_fin {
        tcb.rcv_nxt = tcb.rcv_nxt + 1;
        tcb.rx_fin = true;
        match tcb.state {
            State::SynReceived | State::Established => tcb.set_state(State::CloseWait),
            State::FinWait1 => {
                if tcb.fin_acked() {
                    tcb.enter_time_wait();
                } else {
                    tcb.set_state(State::Closing);
                }
            }
            State::FinWait2 => tcb.enter_time_wait(),
            _ => {}
        }
        let _ = seg::send_ack(stack, tcb);
    }

    // Anything the acknowledgement freed up can leave immediately.
    let _ = output::flush(stack, tcb);
    Outcome::default()
}
