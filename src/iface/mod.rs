//! The seams to the host system.
//!
//! The transport neither owns a network interface nor a clock. The host
//! supplies both: an [IpLayer] that accepts outbound messages and answers
//! routing questions, and a [Clock] whose microsecond reading seeds
//! initial sequence numbers. Inbound segments and time are pushed in
//! through [crate::tcp::Tcp::rx] and [crate::tcp::Tcp::tick].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::pkbuf::NetMsg;
use crate::wire::ipv4::Address;

/// The network layer below the transport.
pub trait IpLayer {
    /// Take ownership of a fully formed transport message and transmit
    /// it. `msg.ip_src`/`msg.ip_dst` carry the addresses for the network
    /// header; the message's headroom is where that header goes.
    fn ip_tx(&mut self, msg: NetMsg);

    /// The MTU of the interface owning `src`, in octets.
    fn ip_get_mtu(&self, src: Address) -> usize;

    /// Source address selection: the local address used to reach `dst`.
    fn ip_get_src_addr(&self, dst: Address) -> Address;
}

/// A monotonic clock with microsecond resolution.
pub trait Clock {
    fn micros(&self) -> u64;
}

/// Wall time from process start. The default clock for hosted use.
pub struct SystemClock(std::time::Instant);

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock(std::time::Instant::now())
    }
}

impl Clock for SystemClock {
    fn micros(&self) -> u64 {
        self.0.elapsed().as_micros() as u64
    }
}

/// The queue a [Loopback] transmits into, shared with whoever drains it.
pub type LoopbackQueue = Arc<Mutex<VecDeque<NetMsg>>>;

/// An IP layer that goes nowhere: transmitted messages pile up in a
/// queue the test or demo harness drains by hand. One interface, one
/// address, a configurable MTU.
pub struct Loopback {
    queue: LoopbackQueue,
    addr: Address,
    mtu: usize,
}

impl Loopback {
    pub fn new(addr: Address, mtu: usize) -> Loopback {
        Loopback {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            addr,
            mtu,
        }
    }

    /// A handle onto the transmit queue, taken before the loopback is
    /// boxed away into the stack.
    pub fn queue(&self) -> LoopbackQueue {
        self.queue.clone()
    }
}

impl IpLayer for Loopback {
    fn ip_tx(&mut self, msg: NetMsg) {
        self.queue.lock().unwrap().push_back(msg);
    }

    fn ip_get_mtu(&self, _src: Address) -> usize {
        self.mtu
    }

    fn ip_get_src_addr(&self, _dst: Address) -> Address {
        self.addr
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn loopback_queues_in_order() {
        let mut lo = Loopback::new(Address::new(10, 0, 2, 20), 576);
        let queue = lo.queue();

        let mut a = NetMsg::alloc(1).unwrap();
        a.segment_mut()[0] = 1;
        let mut b = NetMsg::alloc(1).unwrap();
        b.segment_mut()[0] = 2;
        lo.ip_tx(a);
        lo.ip_tx(b);

        let mut queue = queue.lock().unwrap();
        assert_eq!(queue.pop_front().unwrap().segment(), &[1]);
        assert_eq!(queue.pop_front().unwrap().segment(), &[2]);
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn loopback_answers_routing() {
        let lo = Loopback::new(Address::new(10, 0, 2, 20), 576);
        assert_eq!(lo.ip_get_mtu(Address::new(10, 0, 2, 20)), 576);
        assert_eq!(
            lo.ip_get_src_addr(Address::new(10, 0, 2, 21)),
            Address::new(10, 0, 2, 20)
        );
    }
}
