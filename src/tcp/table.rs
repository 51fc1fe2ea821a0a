//! The process-wide connection table.
//!
//! A flat capacity-capped vector scanned linearly: exact four-tuple
//! matches first, then listeners by local port with wildcard rules. The
//! table holds one shared reference per live block; dropping that
//! reference is what finally frees a connection.

use std::sync::Arc;

use heapless::Vec as FixedVec;

use crate::config::{EPHEMERAL_PORT_FIRST, TCP_MAX_SOCKET_COUNT};
use crate::error::{Error, Result};
use crate::tcp::tcb::{State, TcbRef};
use crate::wire::ip::Endpoint;
use crate::wire::ipv4::{Address, AddressExt};

#[derive(Default)]
pub(crate) struct TcbTable {
    sockets: FixedVec<TcbRef, TCP_MAX_SOCKET_COUNT>,
}

impl TcbTable {
    pub fn new() -> TcbTable {
        TcbTable::default()
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn insert(&mut self, tcb: TcbRef) -> Result<()> {
        self.sockets.push(tcb).map_err(|_| Error::NoMem)
    }

    pub fn remove(&mut self, tcb: &TcbRef) {
        if let Some(index) = self
            .sockets
            .iter()
            .position(|entry| Arc::ptr_eq(entry, tcb))
        {
            self.sockets.swap_remove(index);
        }
    }

    /// Clone the live handles, for the tick sweep.
    pub fn snapshot(&self) -> Vec<TcbRef> {
        self.sockets.iter().cloned().collect()
    }

    /// Route an inbound segment: an exact match on the four-tuple wins;
    /// failing that, a listener on the local port takes it if its bound
    /// address is the segment's destination or the wildcard.
    pub fn lookup(&self, local: Endpoint, foreign: Endpoint) -> Option<TcbRef> {
        for entry in &self.sockets {
            let tcb = entry.lock().unwrap();
            if tcb.quad.local == local && tcb.quad.foreign == foreign {
                return Some(entry.clone());
            }
        }
        for entry in &self.sockets {
            let tcb = entry.lock().unwrap();
            if tcb.state == State::Listen
                && tcb.quad.local.port == local.port
                && (tcb.quad.local.addr.is_wildcard() || tcb.quad.local.addr == local.addr)
                && !tcb.quad.foreign.is_specified()
            {
                return Some(entry.clone());
            }
        }
        None
    }

    fn address_overlaps(a: Address, b: Address) -> bool {
        a.is_wildcard() || b.is_wildcard() || a == b
    }

    /// Whether binding `addr:port` would collide with an existing local
    /// binding. `exclude` is the block doing the binding.
    pub fn local_in_use(&self, addr: Address, port: u16, exclude: Option<&TcbRef>) -> bool {
        self.sockets.iter().any(|entry| {
            if let Some(own) = exclude {
                if Arc::ptr_eq(entry, own) {
                    return false;
                }
            }
            let tcb = entry.lock().unwrap();
            tcb.quad.local.port == port && Self::address_overlaps(tcb.quad.local.addr, addr)
        })
    }

    /// The lowest free port in the ephemeral range.
    pub fn alloc_ephemeral(&self, addr: Address, exclude: Option<&TcbRef>) -> Result<u16> {
        for port in EPHEMERAL_PORT_FIRST..=u16::MAX {
            if !self.local_in_use(addr, port, exclude) {
                return Ok(port);
            }
        }
        Err(Error::AddrInUse)
    }
}
