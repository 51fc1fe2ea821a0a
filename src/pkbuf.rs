//! Network message buffers.
//!
//! A [NetMsg] owns one allocation that a segment travels in between the
//! transport and the IP layer. The transport writes its segment after
//! [crate::config::HEADROOM] reserved octets, and the layers below claim
//! headroom for the network and link headers they prepend; nothing in the
//! crate hands out raw pointers into the allocation, only subslices
//! bounded by the `start`/`end` indices.

use crate::config::HEADROOM;
use crate::error::{Error, Result};
use crate::wire::ipv4::Address;

/// A message in flight between the layers.
#[derive(Debug)]
pub struct NetMsg {
    buffer: Vec<u8>,
    start: usize,
    end: usize,
    /// Network-layer source of an inbound message, or the source the
    /// transport selected for an outbound one.
    pub ip_src: Address,
    /// Network-layer destination.
    pub ip_dst: Address,
}

impl NetMsg {
    /// Allocate a message able to carry a `seg_len`-octet segment plus
    /// the reserved headroom. Fails with [Error::NoMem] instead of
    /// aborting when the allocator cannot satisfy the request.
    pub fn alloc(seg_len: usize) -> Result<NetMsg> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(HEADROOM + seg_len)
            .map_err(|_| Error::NoMem)?;
        buffer.resize(HEADROOM + seg_len, 0);
        Ok(NetMsg {
            buffer,
            start: HEADROOM,
            end: HEADROOM + seg_len,
            ip_src: Address::UNSPECIFIED,
            ip_dst: Address::UNSPECIFIED,
        })
    }

    /// Build an inbound message from a received segment, as the network
    /// layer does after stripping its own header.
    pub fn from_segment(segment: &[u8], ip_src: Address, ip_dst: Address) -> Result<NetMsg> {
        let mut msg = NetMsg::alloc(segment.len())?;
        msg.segment_mut().copy_from_slice(segment);
        msg.ip_src = ip_src;
        msg.ip_dst = ip_dst;
        Ok(msg)
    }

    /// The transport segment length: TCP header plus payload.
    pub fn seg_len(&self) -> usize {
        self.end - self.start
    }

    /// Octets still reserved in front of the segment.
    pub fn headroom(&self) -> usize {
        self.start
    }

    /// The segment itself.
    pub fn segment(&self) -> &[u8] {
        &self.buffer[self.start..self.end]
    }

    pub fn segment_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.start..self.end]
    }

    /// Claim `n` octets of headroom for a lower-layer header and return
    /// them. Fails when the reserve is exhausted.
    pub fn push_front(&mut self, n: usize) -> Result<&mut [u8]> {
        if n > self.start {
            return Err(Error::NoMem);
        }
        self.start -= n;
        Ok(&mut self.buffer[self.start..self.start + n])
    }

    /// Strip `n` octets of decoded header from the front.
    ///
    /// # Panics
    /// Panics if fewer than `n` octets remain.
    pub fn pull_front(&mut self, n: usize) {
        assert!(n <= self.seg_len(), "pulling past the end of the message");
        self.start += n;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn alloc_reserves_headroom() {
        let msg = NetMsg::alloc(100).unwrap();
        assert_eq!(msg.headroom(), HEADROOM);
        assert_eq!(msg.seg_len(), 100);
        assert!(msg.segment().iter().all(|&b| b == 0));
    }

    #[test]
    fn push_and_pull() {
        let mut msg = NetMsg::alloc(10).unwrap();
        msg.segment_mut().copy_from_slice(b"0123456789");

        let l3 = msg.push_front(20).unwrap();
        l3.fill(0x45);
        assert_eq!(msg.headroom(), HEADROOM - 20);
        assert_eq!(msg.seg_len(), 30);

        msg.pull_front(20);
        assert_eq!(msg.segment(), b"0123456789");

        // The reserve is 14 + 20; a second 20-octet claim after the link
        // header would not fit.
        msg.push_front(20).unwrap();
        msg.push_front(14).unwrap();
        assert_eq!(msg.headroom(), 0);
        assert_eq!(msg.push_front(1).unwrap_err(), Error::NoMem);
    }

    #[test]
    fn from_segment_copies() {
        let msg = NetMsg::from_segment(
            b"abc",
            Address::new(10, 0, 2, 21),
            Address::new(10, 0, 2, 20),
        )
        .unwrap();
        assert_eq!(msg.segment(), b"abc");
        assert_eq!(msg.ip_src, Address::new(10, 0, 2, 21));
        assert_eq!(msg.seg_len(), 3);
    }

    #[test]
    #[should_panic(expected = "pulling past the end")]
    fn pull_past_end_panics() {
        let mut msg = NetMsg::alloc(4).unwrap();
        msg.pull_front(5);
    }
}
