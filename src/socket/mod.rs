//! The user-facing socket surface.
//!
//! A [TcpSocket] is one of the two owners of a connection block — the
//! table is the other — and every operation here is non-blocking:
//! anything that would wait returns [Error::Again] and the caller parks
//! on its own condition primitive until [select] reports readiness.
//! Errno values for user programs come from [Error::errno].
//!
//! [select]: TcpSocket::select

use std::sync::{Arc, Mutex};

use heapless::Deque;

use crate::config::{IP_TCP_HEADER_SIZE, SYN_RTO, TCP_MAX_BACKLOG};
use crate::error::{Error, Result};
use crate::tcp::congestion::Congestion;
use crate::tcp::input::effective_mss;
use crate::tcp::table::TcbTable;
use crate::tcp::tcb::Listener;
use crate::tcp::{output, seg, State, Tcb, TcbRef, Tcp};
use crate::time::Ticks;
use crate::wire::ip::Endpoint;
use crate::wire::ipv4::{Address, AddressExt};

/// The only address family the transport speaks.
pub const AF_INET: u16 = 2;

/// Readable, or at end of file, or carrying an error.
pub const SELECT_READ: u8 = 0x1;
/// The send buffer takes more bytes.
pub const SELECT_WRITE: u8 = 0x2;

/// An IPv4 socket address as user programs pass it around.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockAddrIn {
    pub sin_family: u16,
    /// Port, network byte order.
    pub sin_port: u16,
    /// Address, network byte order.
    pub sin_addr: u32,
    pub sin_zero: [u8; 8],
}

impl SockAddrIn {
    pub fn new(addr: Address, port: u16) -> SockAddrIn {
        SockAddrIn {
            sin_family: AF_INET,
            sin_port: port.to_be(),
            sin_addr: u32::from_ne_bytes(addr.octets()),
            sin_zero: [0; 8],
        }
    }

    /// The wildcard address on a port.
    pub fn any(port: u16) -> SockAddrIn {
        SockAddrIn::new(Address::UNSPECIFIED, port)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(
            Address::from(self.sin_addr.to_ne_bytes()),
            u16::from_be(self.sin_port),
        )
    }
}

impl Default for SockAddrIn {
    fn default() -> SockAddrIn {
        SockAddrIn::new(Address::UNSPECIFIED, 0)
    }
}

/// A TCP socket handle.
///
/// Dropping the handle releases its reference on the connection: an
/// open connection is shut down cleanly first, so letting a socket go
/// out of scope behaves like `close` followed by `release`.
pub struct TcpSocket {
    stack: Arc<Tcp>,
    tcb: TcbRef,
}

impl Tcp {
    /// `socket(AF_INET, SOCK_STREAM, IPPROTO_TCP)`: a closed block with
    /// two owners, the table and the returned handle.
    pub fn create_socket(self: &Arc<Self>) -> Result<TcpSocket> {
        let tcb: TcbRef = Arc::new(Mutex::new(Tcb::new()));
        self.table.lock().unwrap().insert(tcb.clone())?;
        Ok(TcpSocket {
            stack: self.clone(),
            tcb,
        })
    }
}

impl TcpSocket {
    /// Current connection state.
    pub fn state(&self) -> State {
        self.tcb.lock().unwrap().state
    }

    /// The bound local address.
    pub fn local_endpoint(&self) -> Endpoint {
        self.tcb.lock().unwrap().quad.local
    }

    /// The connected peer.
    pub fn peer_endpoint(&self) -> Endpoint {
        self.tcb.lock().unwrap().quad.foreign
    }

    /// Attach to a local address. Port zero picks the lowest free
    /// ephemeral port; rebinding is an error, as is a taken address.
    pub fn bind(&self, addr: &SockAddrIn) -> Result<()> {
        if addr.sin_family != AF_INET {
            return Err(Error::Invalid);
        }
        let requested = addr.endpoint();

        let table = self.stack.table.lock().unwrap();
        {
            let tcb = self.tcb.lock().unwrap();
            if tcb.bound || tcb.state != State::Closed {
                return Err(Error::Invalid);
            }
        }
        let port = if requested.port == 0 {
            table.alloc_ephemeral(requested.addr, Some(&self.tcb))?
        } else {
            if table.local_in_use(requested.addr, requested.port, Some(&self.tcb)) {
                return Err(Error::AddrInUse);
            }
            requested.port
        };

        let mut tcb = self.tcb.lock().unwrap();
        tcb.quad.local = Endpoint::new(requested.addr, port);
        tcb.bound = true;
        Ok(())
    }

    /// Passive open. An unbound socket is bound to the wildcard address
    /// on an ephemeral port first.
    pub fn listen(&self, backlog: usize) -> Result<()> {
        let table = self.stack.table.lock().unwrap();
        let max_backlog = backlog.clamp(1, TCP_MAX_BACKLOG);
        {
            let tcb = self.tcb.lock().unwrap();
            match tcb.state {
                State::Closed | State::Listen => {}
                _ => return Err(Error::Invalid),
            }
        }
        let auto_port = {
            let tcb = self.tcb.lock().unwrap();
            if tcb.bound {
                None
            } else {
                Some(table.alloc_ephemeral(Address::UNSPECIFIED, Some(&self.tcb))?)
            }
        };

        let mut tcb = self.tcb.lock().unwrap();
        if tcb.state == State::Listen {
            if let Some(listener) = tcb.listener.as_mut() {
                listener.max_backlog = max_backlog;
            }
            return Ok(());
        }
        if let Some(port) = auto_port {
            tcb.quad.local = Endpoint::new(Address::UNSPECIFIED, port);
            tcb.bound = true;
        }
        tcb.listener = Some(Box::new(Listener {
            backlog: Deque::new(),
            max_backlog,
        }));
        tcb.set_state(State::Listen);
        Ok(())
    }

    /// Active open: send the SYN and report [Error::Again]; the caller
    /// waits and retries until the handshake finished. A later call
    /// returns `Ok` once ESTABLISHED, or the sticky failure.
    pub fn connect(&self, addr: &SockAddrIn) -> Result<()> {
        if addr.sin_family != AF_INET {
            return Err(Error::Invalid);
        }
        let dst = addr.endpoint();
        if !dst.is_specified() {
            return Err(Error::Invalid);
        }

        let table = self.stack.table.lock().unwrap();
        {
            let tcb = self.tcb.lock().unwrap();
            if let Some(error) = tcb.error {
                return Err(error);
            }
            match tcb.state {
                State::Closed => {}
                State::SynSent | State::SynReceived => return Err(Error::Again),
                State::Established => return Ok(()),
                _ => return Err(Error::Invalid),
            }
            if tcb.listener.is_some() {
                return Err(Error::Invalid);
            }
        }

        let (src, mtu) = {
            let ip = self.stack.ip().lock().unwrap();
            let src = ip.ip_get_src_addr(dst.addr);
            (src, ip.ip_get_mtu(src))
        };
        let local = {
            let tcb = self.tcb.lock().unwrap();
            match (tcb.bound, tcb.quad.local) {
                (false, _) => Endpoint::new(src, table.alloc_ephemeral(src, Some(&self.tcb))?),
                (true, bound) if bound.addr.is_wildcard() => Endpoint::new(src, bound.port),
                (true, bound) => bound,
            }
        };

        let mut tcb = self.tcb.lock().unwrap();
        tcb.quad.local = local;
        tcb.bound = true;
        tcb.quad.foreign = dst;
        tcb.allocate_buffers();
        tcb.mss_to_advertise =
            mtu.saturating_sub(IP_TCP_HEADER_SIZE).min(u16::MAX as usize) as u16;
        tcb.smss = effective_mss(None, mtu);

        let iss = self.stack.isn();
        tcb.initialize_send(iss);
        tcb.cc = Congestion::new(tcb.smss, iss);
        tcb.set_state(State::SynSent);
        let _ = seg::send_syn(&self.stack, &mut tcb, false);
        tcb.snd_nxt = iss + 1;
        tcb.snd_max = tcb.snd_nxt;
        tcb.timers.conn = Ticks(SYN_RTO);
        Err(Error::Again)
    }

    /// Queue bytes for transmission; partial copies are fine. A full
    /// buffer is [Error::Again], never a short error.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        let mut tcb = self.tcb.lock().unwrap();
        if let Some(error) = tcb.error {
            return Err(error);
        }
        match tcb.state {
            State::Established | State::CloseWait => {}
            State::SynSent | State::SynReceived => return Err(Error::Again),
            State::Closed | State::Listen => return Err(Error::NotConnected),
            _ => return Err(Error::Invalid),
        }
        if tcb.fin_queued {
            return Err(Error::Invalid);
        }

        let copied = tcb.tx_buffer.enqueue_slice(data);
        if copied == 0 && !data.is_empty() {
            return Err(Error::Again);
        }
        let _ = output::flush(&self.stack, &mut tcb);
        Ok(copied)
    }

    /// Take received bytes. `Ok(0)` is end of file, after the peer's
    /// FIN and a drained buffer.
    pub fn recv(&self, data: &mut [u8]) -> Result<usize> {
        self.recv_inner(data, None)
    }

    /// [recv], also reporting the peer's address.
    ///
    /// [recv]: TcpSocket::recv
    pub fn recvfrom(&self, data: &mut [u8], from: Option<&mut SockAddrIn>) -> Result<usize> {
        self.recv_inner(data, from)
    }

    fn recv_inner(&self, data: &mut [u8], from: Option<&mut SockAddrIn>) -> Result<usize> {
        let mut tcb = self.tcb.lock().unwrap();
        match tcb.state {
            State::Listen => return Err(Error::NotConnected),
            State::Closed if !tcb.connected && tcb.error.is_none() => {
                return Err(Error::NotConnected)
            }
            State::SynSent | State::SynReceived => return Err(Error::Again),
            _ => {}
        }

        let copied = tcb.rx_buffer.dequeue_slice(data);
        if copied == 0 {
            if let Some(error) = tcb.error {
                return Err(error);
            }
            if tcb.rx_fin {
                return Ok(0);
            }
            return Err(Error::Again);
        }

        if let Some(from) = from {
            *from = SockAddrIn::new(tcb.quad.foreign.addr, tcb.quad.foreign.port);
        }
        // Enough new window may be worth announcing right away.
        if tcb.window_update_due() {
            let _ = seg::send_ack(&self.stack, &mut tcb);
        }
        Ok(copied)
    }

    /// Pop an established connection off the listen queue.
    pub fn accept(&self, from: Option<&mut SockAddrIn>) -> Result<TcpSocket> {
        let mut parent = self.tcb.lock().unwrap();
        let Some(listener) = parent.listener.as_mut() else {
            return Err(Error::Invalid);
        };

        let mut kept: Deque<TcbRef, TCP_MAX_BACKLOG> = Deque::new();
        let mut taken: Option<TcbRef> = None;
        while let Some(entry) = listener.backlog.pop_front() {
            if taken.is_none() {
                let ready = {
                    let child = entry.lock().unwrap();
                    matches!(child.state, State::Established | State::CloseWait)
                };
                if ready {
                    taken = Some(entry);
                    continue;
                }
            }
            let _ = kept.push_back(entry);
        }
        listener.backlog = kept;

        let Some(child) = taken else {
            return Err(Error::Again);
        };
        {
            let mut child_tcb = child.lock().unwrap();
            child_tcb.parent = None;
            if let Some(from) = from {
                *from = SockAddrIn::new(child_tcb.quad.foreign.addr, child_tcb.quad.foreign.port);
            }
        }
        Ok(TcpSocket {
            stack: self.stack.clone(),
            tcb: child,
        })
    }

    /// Readiness probe. Bit 0: readable, at end of file, or failed;
    /// on a listener, a connection is there to accept. Bit 1: writable.
    pub fn select(&self, read: bool, write: bool) -> u8 {
        let tcb = self.tcb.lock().unwrap();
        let mut ready = 0;

        if read {
            let acceptable_child = tcb.listener.as_ref().is_some_and(|listener| {
                listener.backlog.iter().any(|entry| {
                    let child = entry.lock().unwrap();
                    matches!(child.state, State::Established | State::CloseWait)
                })
            });
            if !tcb.rx_buffer.is_empty()
                || tcb.eof()
                || tcb.error.is_some()
                || acceptable_child
            {
                ready |= SELECT_READ;
            }
        }
        if write
            && matches!(tcb.state, State::Established | State::CloseWait)
            && !tcb.tx_buffer.is_full()
            && !tcb.fin_queued
        {
            ready |= SELECT_WRITE;
        }
        ready
    }

    /// Shut the connection down. An open connection queues a FIN after
    /// the remaining data; embryonic and listening sockets just leave
    /// the table, a listener taking its unaccepted children with it.
    pub fn close(&self) -> Result<()> {
        let mut table = self.stack.table.lock().unwrap();
        close_internal(&self.stack, &mut table, &self.tcb);
        Ok(())
    }

    /// Give up the handle's reference explicitly. Identical to dropping
    /// the socket.
    pub fn release(self) {}
}

fn close_internal(stack: &Arc<Tcp>, table: &mut TcbTable, tcb_ref: &TcbRef) {
    enum After {
        Nothing,
        Remove,
        CloseChildren(Vec<TcbRef>),
    }

    let after = {
        let mut tcb = tcb_ref.lock().unwrap();
        match tcb.state {
            State::Closed => After::Remove,
            State::SynSent => {
                tcb.timers.cancel_activity();
                tcb.set_state(State::Closed);
                After::Remove
            }
            State::Listen => {
                let mut children = Vec::new();
                if let Some(mut listener) = tcb.listener.take() {
                    while let Some(child) = listener.backlog.pop_front() {
                        children.push(child);
                    }
                }
                tcb.set_state(State::Closed);
                After::CloseChildren(children)
            }
            State::SynReceived | State::Established => {
                tcb.fin_queued = true;
                tcb.set_state(State::FinWait1);
                let _ = output::flush(stack, &mut tcb);
                After::Nothing
            }
            State::CloseWait => {
                tcb.fin_queued = true;
                tcb.set_state(State::LastAck);
                let _ = output::flush(stack, &mut tcb);
                After::Nothing
            }
            _ => After::Nothing,
        }
    };

    match after {
        After::Nothing => {}
        After::Remove => table.remove(tcb_ref),
        After::CloseChildren(children) => {
            for child in &children {
                {
                    let mut child_tcb = child.lock().unwrap();
                    child_tcb.parent = None;
                }
                close_internal(stack, table, child);
            }
            table.remove(tcb_ref);
        }
    }
}

impl Drop for TcpSocket {
    fn drop(&mut self) {
        let mut table = self.stack.table.lock().unwrap();
        close_internal(&self.stack, &mut table, &self.tcb);
    }
}
