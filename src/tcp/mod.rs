//! The transport engine.
//!
//! A [Tcp] owns the connection table and the seams to the host: the IP
//! layer it transmits through and the clock that seeds initial sequence
//! numbers. The host pushes inbound segments into [Tcp::rx] and drives
//! time by calling [Tcp::tick] at [crate::config::TCP_HZ] per second;
//! user programs reach the engine through [crate::socket::TcpSocket].
//!
//! Locking is table first, then a connection, then the IP layer; the
//! table lock is held across a whole segment or tick so handlers run to
//! completion one at a time. Handlers themselves never take the table
//! lock — they report insertions and removals in an `Outcome` applied
//! afterwards.

pub(crate) mod congestion;
pub(crate) mod input;
pub(crate) mod output;
pub(crate) mod rtt;
pub(crate) mod seg;
pub(crate) mod table;
pub(crate) mod tcb;
pub(crate) mod timer;

pub use self::tcb::{Quad, State};
pub(crate) use self::tcb::{Tcb, TcbRef};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use heapless::Deque;

use crate::config::{MAX_SYN_RETRIES, SYN_RTO, TCP_MAX_BACKLOG};
use crate::error::Error;
use crate::iface::{Clock, IpLayer};
use crate::pkbuf::NetMsg;
use crate::time::Ticks;
use crate::wire::{TcpPacket, TcpRepr, TcpSeqNumber};

use self::input::{Outcome, SegmentView};
use self::table::TcbTable;

/// The TCP engine: connection table, ISN source, and the handles the
/// host gave us.
pub struct Tcp {
    ip: Mutex<Box<dyn IpLayer + Send>>,
    clock: Box<dyn Clock + Send + Sync>,
    pub(crate) table: Mutex<TcbTable>,
    isn_counter: AtomicU32,
}

impl Tcp {
    /// Bring the transport up against the host's IP layer and clock.
    pub fn new(ip: Box<dyn IpLayer + Send>, clock: Box<dyn Clock + Send + Sync>) -> Arc<Tcp> {
        Arc::new(Tcp {
            ip: Mutex::new(ip),
            clock,
            table: Mutex::new(TcbTable::new()),
            isn_counter: AtomicU32::new(0),
        })
    }

    pub(crate) fn ip(&self) -> &Mutex<Box<dyn IpLayer + Send>> {
        &self.ip
    }

    /// An initial sequence number: the microsecond clock folded with a
    /// per-stack counter, so two connections opened in the same
    /// microsecond still differ.
    pub(crate) fn isn(&self) -> TcpSeqNumber {
        let counter = self.isn_counter.fetch_add(1 << 12, Ordering::Relaxed);
        TcpSeqNumber((self.clock.micros() as u32) ^ counter)
    }

    /// Live control blocks, TIME_WAIT remnants included.
    pub fn socket_count(&self) -> usize {
        self.table.lock().unwrap().len()
    }

    /// An inbound segment from the IP layer.
    ///
    /// Malformed segments — short header, bad data offset, broken
    /// option lengths, failing checksum — are dropped without a word on
    /// the wire. A well-formed segment matching no connection draws the
    /// RFC 793 reset.
    pub fn rx(&self, msg: NetMsg) {
        let src = msg.ip_src;
        let dst = msg.ip_dst;
        let packet = match TcpPacket::new_checked(msg.segment()) {
            Ok(packet) => packet,
            Err(_) => {
                net_trace!("tcp: rx malformed header from {}", src);
                return;
            }
        };
        let repr = match TcpRepr::parse(&packet, &src, &dst) {
            Ok(repr) => repr,
            Err(_) => {
                net_trace!("tcp: rx malformed segment from {}", src);
                return;
            }
        };
        let view = SegmentView {
            src_addr: src,
            dst_addr: dst,
            repr,
        };
        net_trace!("tcp: rx {} -> {} {}", src, dst, view.repr);

        let mut table = self.table.lock().unwrap();
        let Some(target) = table.lookup(view.local(), view.foreign()) else {
            net_debug!("tcp: rx no connection for {} -> {}", view.foreign(), view.local());
            let _ = seg::reply_rst(self, &view);
            return;
        };

        let outcome = {
            let mut tcb = target.lock().unwrap();
            input::process(self, &mut tcb, &target, &view)
        };
        self.apply(&mut table, outcome, &target);
    }

    /// One TCP clock tick: run every countdown, turn zero crossings into
    /// retransmissions, probes, delayed ACKs and expiries.
    pub fn tick(&self) {
        let mut table = self.table.lock().unwrap();
        for target in table.snapshot() {
            let outcome = {
                let mut tcb = target.lock().unwrap();
                self.tick_one(&mut tcb)
            };
            self.apply(&mut table, outcome, &target);
        }
    }

    fn tick_one(&self, tcb: &mut Tcb) -> Outcome {
        tcb.rtte.on_tick();
        let fired = tcb.timers.tick();
        if !fired.any() {
            return Outcome::default();
        }

        if fired.delayed_ack {
            let _ = seg::send_ack(self, tcb);
        }

        if fired.retransmit && !output::on_retransmit_timeout(self, tcb) {
            // Out of retries; an unaccepted child also gives its backlog
            // slot back.
            return Outcome {
                remove: true,
                unlink: tcb.parent.clone(),
                ..Default::default()
            };
        }

        if fired.persist {
            let _ = output::send_window_probe(self, tcb);
        }

        if fired.conn {
            if let State::SynSent | State::SynReceived = tcb.state {
                if tcb.syn_retries >= MAX_SYN_RETRIES {
                    let unlink = tcb.parent.clone();
                    if unlink.is_some() {
                        tcb.set_state(State::Closed);
                    } else {
                        tcb.fail(Error::ConnAborted);
                    }
                    return Outcome {
                        remove: true,
                        unlink,
                        ..Default::default()
                    };
                }
                tcb.syn_retries += 1;
                net_debug!("tcp: {} handshake retransmit #{}", tcb.quad, tcb.syn_retries);
                let _ = seg::send_syn(self, tcb, tcb.state == State::SynReceived);
                tcb.timers.conn = Ticks(SYN_RTO);
            }
        }

        if fired.time_wait {
            net_debug!("tcp: {} left TIME-WAIT", tcb.quad);
            tcb.set_state(State::Closed);
            return Outcome::remove();
        }

        Outcome::default()
    }

    /// Apply the table mutations a handler asked for, after its lock on
    /// the block has been released.
    fn apply(&self, table: &mut TcbTable, outcome: Outcome, target: &TcbRef) {
        if let Some(parent) = outcome.unlink.and_then(|weak| weak.upgrade()) {
            Self::drop_backlog_slot(&parent, target);
        }

        if let Some(child) = outcome.child {
            if table.insert(child.clone()).is_err() {
                net_debug!("tcp: connection table full, dropping embryo");
                let weak = {
                    let mut child_tcb = child.lock().unwrap();
                    child_tcb.set_state(State::Closed);
                    child_tcb.parent.take()
                };
                if let Some(parent) = weak.and_then(|weak| weak.upgrade()) {
                    Self::drop_backlog_slot(&parent, &child);
                }
            }
        }

        if outcome.remove {
            table.remove(target);
        }
    }

    fn drop_backlog_slot(parent: &TcbRef, child: &TcbRef) {
        let mut parent = parent.lock().unwrap();
        if let Some(listener) = parent.listener.as_mut() {
            let mut kept: Deque<TcbRef, TCP_MAX_BACKLOG> = Deque::new();
            while let Some(entry) = listener.backlog.pop_front() {
                if !Arc::ptr_eq(&entry, child) {
                    let _ = kept.push_back(entry);
                }
            }
            listener.backlog = kept;
        }
    }
}
