//! End-to-end exercises of the transport against a scripted peer.
//!
//! The stack runs over a captive IP layer; tests pop what it transmits,
//! inject handcrafted segments back, and drive time by ticking.

use std::sync::Arc;

use ktcp::config::{RCV_BUFFER_SIZE, RTO_MIN, SYN_RTO, TCP_MSL};
use ktcp::iface::{Clock, Loopback, LoopbackQueue};
use ktcp::socket::{SockAddrIn, SELECT_READ, SELECT_WRITE};
use ktcp::wire::{Ipv4Address, TcpControl, TcpPacket, TcpRepr, TcpSeqNumber};
use ktcp::{Error, NetMsg, State, Tcp, TcpSocket};

const LOCAL: Ipv4Address = Ipv4Address::new(10, 0, 2, 20);
const PEER: Ipv4Address = Ipv4Address::new(10, 0, 2, 21);
const PEER_PORT: u16 = 30000;
const MTU: usize = 576;
const MSS: usize = 536;

struct TestClock;

impl Clock for TestClock {
    fn micros(&self) -> u64 {
        0x0004_c0de
    }
}

struct Harness {
    stack: Arc<Tcp>,
    queue: LoopbackQueue,
}

/// A transmitted segment, decoded for assertions.
#[derive(Debug)]
struct Seg {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: Option<u32>,
    window: u16,
    syn: bool,
    fin: bool,
    rst: bool,
    psh: bool,
    mss: Option<u16>,
    payload: Vec<u8>,
}

fn harness() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let lo = Loopback::new(LOCAL, MTU);
    let queue = lo.queue();
    Harness {
        stack: Tcp::new(Box::new(lo), Box::new(TestClock)),
        queue,
    }
}

impl Harness {
    fn pop_maybe(&self) -> Option<Seg> {
        let msg = self.queue.lock().unwrap().pop_front()?;
        let packet = TcpPacket::new_checked(msg.segment()).unwrap();
        // Everything we emit must carry a correct checksum.
        assert!(packet.verify_checksum(&msg.ip_src, &msg.ip_dst));
        let repr = TcpRepr::parse(&packet, &msg.ip_src, &msg.ip_dst).unwrap();
        Some(Seg {
            src_port: repr.src_port,
            dst_port: repr.dst_port,
            seq: repr.seq_number.0,
            ack: repr.ack_number.map(|ack| ack.0),
            window: repr.window_len,
            syn: repr.control == TcpControl::Syn,
            fin: repr.control == TcpControl::Fin,
            rst: repr.control == TcpControl::Rst,
            psh: repr.push,
            mss: repr.max_seg_size,
            payload: repr.payload.to_vec(),
        })
    }

    fn pop(&self) -> Seg {
        self.pop_maybe().expect("expected a transmitted segment")
    }

    fn assert_quiet(&self) {
        let pending = self.queue.lock().unwrap().len();
        assert_eq!(pending, 0, "unexpected transmission");
    }

    fn tick(&self, n: u32) {
        for _ in 0..n {
            self.stack.tick();
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn inject_from(
        &self,
        src_port: u16,
        dst_port: u16,
        seq: u32,
        ack: Option<u32>,
        window: u16,
        control: TcpControl,
        payload: &[u8],
    ) {
        let repr = TcpRepr {
            src_port,
            dst_port,
            control,
            push: false,
            seq_number: TcpSeqNumber(seq),
            ack_number: ack.map(TcpSeqNumber),
            window_len: window,
            max_seg_size: None,
            payload,
        };
        let mut buffer = vec![0; repr.buffer_len()];
        repr.emit(&mut TcpPacket::new_unchecked(&mut buffer[..]), &PEER, &LOCAL);
        self.stack
            .rx(NetMsg::from_segment(&buffer, PEER, LOCAL).unwrap());
    }

    fn inject(
        &self,
        dst_port: u16,
        seq: u32,
        ack: Option<u32>,
        window: u16,
        control: TcpControl,
        payload: &[u8],
    ) {
        self.inject_from(PEER_PORT, dst_port, seq, ack, window, control, payload)
    }
}

/// Run the client handshake: SYN out, SYN-ACK (peer ISS 1) in, ACK out.
/// Returns the socket, the ephemeral local port and our ISS.
fn establish(h: &Harness, peer_window: u16) -> (TcpSocket, u16, u32) {
    let socket = h.stack.create_socket().unwrap();
    let peer = SockAddrIn::new(PEER, PEER_PORT);
    assert_eq!(socket.connect(&peer), Err(Error::Again));
    assert_eq!(socket.state(), State::SynSent);

    let syn = h.pop();
    assert!(syn.syn && syn.ack.is_none());
    assert_eq!(syn.dst_port, PEER_PORT);
    assert_eq!(syn.mss, Some(MSS as u16));
    let iss = syn.seq;

    h.inject(
        syn.src_port,
        1,
        Some(iss.wrapping_add(1)),
        peer_window,
        TcpControl::Syn,
        &[],
    );

    let ack = h.pop();
    assert!(!ack.syn && !ack.fin && !ack.rst && ack.payload.is_empty());
    assert_eq!(ack.seq, iss.wrapping_add(1));
    assert_eq!(ack.ack, Some(2));
    assert_eq!(socket.state(), State::Established);
    assert_eq!(socket.connect(&peer), Ok(()));
    h.assert_quiet();
    (socket, syn.src_port, iss)
}

#[test]
fn three_way_handshake() {
    let h = harness();
    let (socket, port, _iss) = establish(&h, 2048);
    assert!(port >= 49152);
    assert_eq!(socket.local_endpoint().addr, LOCAL);
    assert_eq!(socket.peer_endpoint().port, PEER_PORT);
    // Fresh connection: writable, nothing to read.
    assert_eq!(socket.select(true, true), SELECT_WRITE);
}

#[test]
fn handshake_advertises_the_receive_buffer() {
    let h = harness();
    let socket = h.stack.create_socket().unwrap();
    let _ = socket.connect(&SockAddrIn::new(PEER, PEER_PORT));
    let syn = h.pop();
    assert_eq!(syn.window as usize, RCV_BUFFER_SIZE);
}

#[test]
fn nagle_holds_the_small_tail() {
    let h = harness();
    let (socket, port, iss) = establish(&h, 2048);

    // Three acknowledged full segments open the congestion window past
    // the peer's 2048.
    let mut acked = 0u32;
    for _ in 0..3 {
        assert_eq!(socket.send(&[0x55; MSS]).unwrap(), MSS);
        let seg = h.pop();
        assert_eq!(seg.payload.len(), MSS);
        acked += MSS as u32;
        h.inject(
            port,
            2,
            Some(iss.wrapping_add(1 + acked)),
            2048,
            TcpControl::None,
            &[],
        );
        h.assert_quiet();
    }

    // 1024 queued: one full segment leaves, 488 stay behind.
    assert_eq!(socket.send(&[0x66; 1024]).unwrap(), 1024);
    let seg = h.pop();
    assert_eq!(seg.payload.len(), MSS);
    assert!(!seg.psh);
    assert_eq!(seg.seq, iss.wrapping_add(1 + acked));
    h.assert_quiet();

    // The ACK releases the tail, pushed because it drains the queue.
    h.inject(
        port,
        2,
        Some(iss.wrapping_add(1 + acked + MSS as u32)),
        2048,
        TcpControl::None,
        &[],
    );
    let tail = h.pop();
    assert_eq!(tail.payload.len(), 1024 - MSS);
    assert!(tail.psh);
    h.assert_quiet();
}

#[test]
fn delayed_ack_waits_one_tick() {
    let h = harness();
    let (socket, port, iss) = establish(&h, 2048);

    h.inject(port, 2, Some(iss.wrapping_add(1)), 2048, TcpControl::None, &[0xAA; 128]);
    h.assert_quiet();

    h.tick(1);
    let ack = h.pop();
    assert_eq!(ack.ack, Some(130));
    h.assert_quiet();

    let mut buf = [0u8; 256];
    assert_eq!(socket.recv(&mut buf).unwrap(), 128);
}

#[test]
fn second_in_order_segment_forces_the_ack() {
    let h = harness();
    let (_socket, port, iss) = establish(&h, 2048);

    h.inject(port, 2, Some(iss.wrapping_add(1)), 2048, TcpControl::None, &[0xAA; 128]);
    h.assert_quiet();
    h.inject(port, 130, Some(iss.wrapping_add(1)), 2048, TcpControl::None, &[0xBB; 128]);
    let ack = h.pop();
    assert_eq!(ack.ack, Some(258));
    h.assert_quiet();
}

#[test]
fn out_of_order_data_draws_an_immediate_duplicate_ack() {
    let h = harness();
    let (socket, port, iss) = establish(&h, 2048);

    h.inject(port, 2, Some(iss.wrapping_add(1)), 2048, TcpControl::None, &[0xAA; 128]);
    h.assert_quiet();

    // 384 bytes of hole, then 128 more: dropped, acknowledged at once.
    h.inject(port, 514, Some(iss.wrapping_add(1)), 2048, TcpControl::None, &[0xBB; 128]);
    let dup = h.pop();
    assert!(dup.payload.is_empty());
    assert_eq!(dup.ack, Some(130));
    h.assert_quiet();

    // Only the in-order bytes were delivered.
    let mut buf = [0u8; 1024];
    assert_eq!(socket.recv(&mut buf).unwrap(), 128);
    assert_eq!(socket.recv(&mut buf), Err(Error::Again));
}

#[test]
fn left_overlapping_retransmission_is_accepted() {
    let h = harness();
    let (socket, port, iss) = establish(&h, 2048);

    h.inject(port, 2, Some(iss.wrapping_add(1)), 2048, TcpControl::None, &[0x01; 100]);
    h.assert_quiet();
    // Retransmission covering the same 100 plus 100 new.
    h.inject(port, 2, Some(iss.wrapping_add(1)), 2048, TcpControl::None, &[0x02; 200]);
    let ack = h.pop();
    assert_eq!(ack.ack, Some(202));

    let mut buf = [0u8; 512];
    assert_eq!(socket.recv(&mut buf).unwrap(), 200);
}

#[test]
fn retransmission_backs_off_exponentially() {
    let h = harness();
    let (socket, port, iss) = establish(&h, 2048);
    let _ = (port, iss);

    assert_eq!(socket.send(&[0x11; 100]).unwrap(), 100);
    let first = h.pop();
    assert_eq!(first.payload.len(), 100);
    assert!(first.psh);
    h.assert_quiet();

    // Nothing until the timeout, the same bytes at the timeout.
    h.tick(RTO_MIN - 1);
    h.assert_quiet();
    h.tick(1);
    let rexmit = h.pop();
    assert_eq!(rexmit.seq, first.seq);
    assert_eq!(rexmit.payload, first.payload);
    h.assert_quiet();

    // Doubled interval before the next try.
    h.tick(2 * RTO_MIN - 1);
    h.assert_quiet();
    h.tick(1);
    let again = h.pop();
    assert_eq!(again.seq, first.seq);
}

#[test]
fn retries_exhaust_into_timed_out() {
    let h = harness();
    let (socket, _port, _iss) = establish(&h, 2048);

    assert_eq!(socket.send(&[0x11; 100]).unwrap(), 100);
    let _ = h.pop();

    // 4 + 8 + 16 + 32 ticks of retransmissions, dead at the fifth expiry.
    h.tick(500);
    while h.pop_maybe().is_some() {}
    assert_eq!(socket.send(b"x"), Err(Error::TimedOut));
    let mut buf = [0u8; 8];
    assert_eq!(socket.recv(&mut buf), Err(Error::TimedOut));
    assert_eq!(h.stack.socket_count(), 0);
}

#[test]
fn fast_retransmit_and_recovery() {
    let h = harness();
    let (socket, port, iss) = establish(&h, 8192);

    // Five acknowledged segments: the congestion window reaches 6 MSS.
    let mut acked = 0u32;
    for _ in 0..5 {
        assert_eq!(socket.send(&[0x33; MSS]).unwrap(), MSS);
        let seg = h.pop();
        assert_eq!(seg.payload.len(), MSS);
        acked += MSS as u32;
        h.inject(
            port,
            2,
            Some(iss.wrapping_add(1 + acked)),
            8192,
            TcpControl::None,
            &[],
        );
        h.assert_quiet();
    }

    // A burst fills the window: six segments in flight.
    assert_eq!(socket.send(&vec![0x44; 8192]).unwrap(), 8192);
    let mut burst = Vec::new();
    for _ in 0..6 {
        burst.push(h.pop());
    }
    h.assert_quiet();
    let head = burst[0].seq;
    assert_eq!(head, iss.wrapping_add(1 + acked));

    // Two duplicates change nothing; the third retransmits the head.
    h.inject(port, 2, Some(head), 8192, TcpControl::None, &[]);
    h.inject(port, 2, Some(head), 8192, TcpControl::None, &[]);
    h.assert_quiet();
    h.inject(port, 2, Some(head), 8192, TcpControl::None, &[]);
    let rexmit = h.pop();
    assert_eq!(rexmit.seq, head);
    assert_eq!(rexmit.payload.len(), MSS);
    h.assert_quiet();

    // Each further duplicate inflates the window by one segment, which
    // lets one more new segment out.
    h.inject(port, 2, Some(head), 8192, TcpControl::None, &[]);
    let extra1 = h.pop();
    assert_eq!(extra1.payload.len(), MSS);
    h.assert_quiet();
    h.inject(port, 2, Some(head), 8192, TcpControl::None, &[]);
    let extra2 = h.pop();
    assert_eq!(extra2.payload.len(), MSS);
    assert_eq!(extra2.seq, extra1.seq.wrapping_add(MSS as u32));
    h.assert_quiet();

    // Acknowledging the whole pre-loss flight ends recovery: the window
    // deflates to ssthresh (3 MSS), good for exactly one more segment
    // on top of the two still outstanding.
    let recovery = head.wrapping_add(6 * MSS as u32);
    h.inject(port, 2, Some(recovery), 8192, TcpControl::None, &[]);
    let after = h.pop();
    assert_eq!(after.payload.len(), MSS);
    h.assert_quiet();
}

#[test]
fn zero_window_probing() {
    let h = harness();
    let (socket, port, iss) = establish(&h, 2048);

    assert_eq!(socket.send(&[0x77; MSS]).unwrap(), MSS);
    let _ = h.pop();
    // Everything acknowledged, window slammed shut.
    h.inject(
        port,
        2,
        Some(iss.wrapping_add(1 + MSS as u32)),
        0,
        TcpControl::None,
        &[],
    );
    h.assert_quiet();

    // New data has nowhere to go; the persist timer arms at the RTO.
    assert_eq!(socket.send(&[0x88; 600]).unwrap(), 600);
    h.assert_quiet();
    h.tick(RTO_MIN - 1);
    h.assert_quiet();
    h.tick(1);
    let probe = h.pop();
    assert_eq!(probe.payload.len(), 1);
    assert_eq!(probe.payload[0], 0x88);
    assert_eq!(probe.seq, iss.wrapping_add(1 + MSS as u32));
    h.assert_quiet();

    // The repeat probe carries the same octet, backed off, never a RST.
    h.tick(2 * RTO_MIN);
    let probe2 = h.pop();
    assert!(!probe2.rst);
    assert_eq!(probe2.seq, probe.seq);
    assert_eq!(probe2.payload.len(), 1);
    h.assert_quiet();

    // The peer takes the octet and reopens: a full segment follows.
    h.inject(
        port,
        2,
        Some(probe.seq.wrapping_add(1)),
        2048,
        TcpControl::None,
        &[],
    );
    let full = h.pop();
    assert_eq!(full.payload.len(), MSS);
    h.assert_quiet();
}

#[test]
fn simultaneous_close_meets_in_time_wait() {
    let h = harness();
    let (socket, port, iss) = establish(&h, 2048);

    socket.close().unwrap();
    let fin = h.pop();
    assert!(fin.fin);
    assert_eq!(fin.seq, iss.wrapping_add(1));
    assert_eq!(socket.state(), State::FinWait1);
    h.assert_quiet();

    // The peer's FIN crossed ours in flight: it cannot acknowledge ours.
    h.inject(port, 2, Some(iss.wrapping_add(1)), 2048, TcpControl::Fin, &[]);
    let ack = h.pop();
    assert_eq!(ack.ack, Some(3));
    assert_eq!(socket.state(), State::Closing);
    h.assert_quiet();

    // Its ACK of our FIN finishes the exchange on our side.
    h.inject(port, 3, Some(iss.wrapping_add(2)), 2048, TcpControl::None, &[]);
    assert_eq!(socket.state(), State::TimeWait);
    assert_eq!(h.stack.socket_count(), 1);

    h.tick(2 * TCP_MSL - 1);
    assert_eq!(h.stack.socket_count(), 1);
    h.tick(1);
    assert_eq!(h.stack.socket_count(), 0);
    assert_eq!(socket.state(), State::Closed);
}

#[test]
fn time_wait_reacks_a_retransmitted_fin() {
    let h = harness();
    let (socket, port, iss) = establish(&h, 2048);

    socket.close().unwrap();
    let _fin = h.pop();
    // FIN-ACK from the peer: straight to TIME_WAIT.
    h.inject(port, 2, Some(iss.wrapping_add(2)), 2048, TcpControl::Fin, &[]);
    let _ack = h.pop();
    assert_eq!(socket.state(), State::TimeWait);

    // Half the wait later its FIN shows up again: our ACK was lost.
    h.tick(TCP_MSL);
    h.inject(port, 2, Some(iss.wrapping_add(2)), 2048, TcpControl::Fin, &[]);
    let reack = h.pop();
    assert_eq!(reack.ack, Some(3));

    // The 2 MSL clock restarted with the re-ACK.
    h.tick(2 * TCP_MSL - 1);
    assert_eq!(h.stack.socket_count(), 1);
    h.tick(1);
    assert_eq!(h.stack.socket_count(), 0);
}

#[test]
fn passive_open_accept_and_data() {
    let h = harness();
    let listener = h.stack.create_socket().unwrap();
    listener.bind(&SockAddrIn::new(LOCAL, 7000)).unwrap();
    listener.listen(4).unwrap();

    h.inject(7000, 100, None, 4096, TcpControl::Syn, &[]);
    let synack = h.pop();
    assert!(synack.syn);
    assert_eq!(synack.src_port, 7000);
    assert_eq!(synack.ack, Some(101));
    assert_eq!(synack.mss, Some(MSS as u16));
    let child_iss = synack.seq;

    // Not established yet: nothing to accept.
    assert!(matches!(listener.accept(None), Err(Error::Again)));
    assert_eq!(listener.select(true, false), 0);

    h.inject(7000, 101, Some(child_iss.wrapping_add(1)), 4096, TcpControl::None, &[]);
    assert_eq!(listener.select(true, false), SELECT_READ);

    let mut from = SockAddrIn::default();
    let child = listener.accept(Some(&mut from)).unwrap();
    assert_eq!(from.endpoint().port, PEER_PORT);
    assert_eq!(from.endpoint().addr, PEER);
    assert_eq!(child.state(), State::Established);
    assert_eq!(child.local_endpoint().addr, LOCAL);

    h.inject(7000, 101, Some(child_iss.wrapping_add(1)), 4096, TcpControl::None, b"hello");
    h.tick(1);
    let ack = h.pop();
    assert_eq!(ack.ack, Some(106));

    let mut buf = [0u8; 16];
    assert_eq!(child.recvfrom(&mut buf, None).unwrap(), 5);
    assert_eq!(&buf[..5], b"hello");
}

#[test]
fn backlog_overflow_drops_the_syn_silently() {
    let h = harness();
    let listener = h.stack.create_socket().unwrap();
    listener.bind(&SockAddrIn::new(LOCAL, 7000)).unwrap();
    listener.listen(1).unwrap();

    h.inject_from(40001, 7000, 100, None, 4096, TcpControl::Syn, &[]);
    let synack = h.pop();
    assert!(synack.syn);

    h.inject_from(40002, 7000, 200, None, 4096, TcpControl::Syn, &[]);
    h.assert_quiet();
}

#[test]
fn listener_answers_stray_ack_with_rst() {
    let h = harness();
    let listener = h.stack.create_socket().unwrap();
    listener.bind(&SockAddrIn::new(LOCAL, 7000)).unwrap();
    listener.listen(4).unwrap();

    h.inject(7000, 100, Some(31337), 4096, TcpControl::None, &[]);
    let rst = h.pop();
    assert!(rst.rst);
    assert_eq!(rst.seq, 31337);
    assert_eq!(rst.ack, None);
}

#[test]
fn unmatched_segments_draw_the_rfc_resets() {
    let h = harness();

    // No ACK: RST-ACK acknowledging everything the segment occupied.
    h.inject(9999, 55, None, 1024, TcpControl::Syn, &[]);
    let rst = h.pop();
    assert!(rst.rst);
    assert_eq!(rst.seq, 0);
    assert_eq!(rst.ack, Some(56));

    // With an ACK: mirror it, no ACK of our own.
    h.inject(9998, 55, Some(777), 1024, TcpControl::None, &[]);
    let rst = h.pop();
    assert!(rst.rst);
    assert_eq!(rst.seq, 777);
    assert_eq!(rst.ack, None);

    // Never reset a reset.
    h.inject(9997, 1, Some(1), 0, TcpControl::Rst, &[]);
    h.assert_quiet();
}

#[test]
fn peer_reset_is_sticky() {
    let h = harness();
    let (socket, port, iss) = establish(&h, 2048);

    h.inject(port, 2, Some(iss.wrapping_add(1)), 2048, TcpControl::Rst, &[]);
    assert_eq!(h.stack.socket_count(), 0);

    let mut buf = [0u8; 8];
    assert_eq!(socket.recv(&mut buf), Err(Error::ConnReset));
    assert_eq!(socket.send(b"x"), Err(Error::ConnReset));
    assert_eq!(socket.recv(&mut buf), Err(Error::ConnReset));
    // An error socket reports readable so the waiter wakes up.
    assert_eq!(socket.select(true, true), SELECT_READ);
}

#[test]
fn connect_refused_by_rst() {
    let h = harness();
    let socket = h.stack.create_socket().unwrap();
    let peer = SockAddrIn::new(PEER, PEER_PORT);
    assert_eq!(socket.connect(&peer), Err(Error::Again));
    let syn = h.pop();

    h.inject(
        syn.src_port,
        0,
        Some(syn.seq.wrapping_add(1)),
        0,
        TcpControl::Rst,
        &[],
    );
    assert_eq!(socket.connect(&peer), Err(Error::ConnRefused));
    assert_eq!(h.stack.socket_count(), 0);
}

#[test]
fn syn_retransmits_then_aborts() {
    let h = harness();
    let socket = h.stack.create_socket().unwrap();
    assert_eq!(
        socket.connect(&SockAddrIn::new(PEER, PEER_PORT)),
        Err(Error::Again)
    );
    let syn = h.pop();

    // Five retries, each a true copy, fifteen seconds apart.
    for _ in 0..5 {
        h.tick(SYN_RTO - 1);
        h.assert_quiet();
        h.tick(1);
        let again = h.pop();
        assert!(again.syn);
        assert_eq!(again.seq, syn.seq);
        assert_eq!(again.mss, syn.mss);
    }

    h.tick(SYN_RTO);
    h.assert_quiet();
    assert_eq!(
        socket.connect(&SockAddrIn::new(PEER, PEER_PORT)),
        Err(Error::ConnAborted)
    );
    assert_eq!(h.stack.socket_count(), 0);
}

#[test]
fn simultaneous_open() {
    let h = harness();
    let socket = h.stack.create_socket().unwrap();
    assert_eq!(
        socket.connect(&SockAddrIn::new(PEER, PEER_PORT)),
        Err(Error::Again)
    );
    let syn = h.pop();

    // The peer's SYN crosses ours: we answer SYN-ACK, ISS unchanged.
    h.inject(syn.src_port, 900, None, 2048, TcpControl::Syn, &[]);
    let synack = h.pop();
    assert!(synack.syn);
    assert_eq!(synack.seq, syn.seq);
    assert_eq!(synack.ack, Some(901));
    assert_eq!(socket.state(), State::SynReceived);

    h.inject(
        syn.src_port,
        901,
        Some(syn.seq.wrapping_add(1)),
        2048,
        TcpControl::None,
        &[],
    );
    assert_eq!(socket.state(), State::Established);
}

#[test]
fn remote_close_then_local_close() {
    let h = harness();
    let (socket, port, iss) = establish(&h, 2048);

    h.inject(port, 2, Some(iss.wrapping_add(1)), 2048, TcpControl::None, b"bye");
    h.tick(1);
    let _ack = h.pop();
    h.inject(port, 5, Some(iss.wrapping_add(1)), 2048, TcpControl::Fin, &[]);
    let fin_ack = h.pop();
    assert_eq!(fin_ack.ack, Some(6));
    assert_eq!(socket.state(), State::CloseWait);

    // Data first, then a clean end of file.
    let mut buf = [0u8; 16];
    assert_eq!(socket.recv(&mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"bye");
    assert_eq!(socket.recv(&mut buf).unwrap(), 0);
    assert_eq!(socket.select(true, false), SELECT_READ);

    socket.close().unwrap();
    assert_eq!(socket.state(), State::LastAck);
    let fin = h.pop();
    assert!(fin.fin);
    assert_eq!(fin.seq, iss.wrapping_add(1));

    h.inject(port, 6, Some(iss.wrapping_add(2)), 2048, TcpControl::None, &[]);
    assert_eq!(socket.state(), State::Closed);
    assert_eq!(h.stack.socket_count(), 0);
}

#[test]
fn receiver_window_update_after_drain() {
    let h = harness();
    let (socket, port, iss) = establish(&h, 2048);

    h.inject(port, 2, Some(iss.wrapping_add(1)), 2048, TcpControl::None, &vec![1; 4096]);
    h.assert_quiet();
    h.inject(
        port,
        4098,
        Some(iss.wrapping_add(1)),
        2048,
        TcpControl::None,
        &vec![2; 4096],
    );
    let ack = h.pop();
    assert_eq!(ack.ack, Some(8194));
    assert_eq!(ack.window, 0);
    h.assert_quiet();

    // Draining far more than one MSS announces the new window at once.
    let mut buf = vec![0u8; 4096];
    assert_eq!(socket.recv(&mut buf).unwrap(), 4096);
    let update = h.pop();
    assert_eq!(update.ack, Some(8194));
    assert_eq!(update.window, 4096);
}

#[test]
fn malformed_segments_are_dropped_silently() {
    let h = harness();
    let (_socket, port, iss) = establish(&h, 2048);

    // Truncated header.
    h.stack
        .rx(NetMsg::from_segment(&[0u8; 10], PEER, LOCAL).unwrap());
    h.assert_quiet();

    // Corrupted checksum.
    let repr = TcpRepr {
        src_port: PEER_PORT,
        dst_port: port,
        control: TcpControl::None,
        push: false,
        seq_number: TcpSeqNumber(2),
        ack_number: Some(TcpSeqNumber(iss.wrapping_add(1))),
        window_len: 2048,
        max_seg_size: None,
        payload: b"data",
    };
    let mut buffer = vec![0; repr.buffer_len()];
    repr.emit(&mut TcpPacket::new_unchecked(&mut buffer[..]), &PEER, &LOCAL);
    buffer[7] ^= 0xff;
    h.stack
        .rx(NetMsg::from_segment(&buffer, PEER, LOCAL).unwrap());
    h.assert_quiet();

    // A zero option length never walks the parser off the header.
    let mut buffer = vec![0u8; 24];
    {
        let mut packet = TcpPacket::new_unchecked(&mut buffer[..]);
        packet.set_src_port(PEER_PORT);
        packet.set_dst_port(port);
        packet.set_seq_number(TcpSeqNumber(2));
        packet.set_ack_number(TcpSeqNumber(iss.wrapping_add(1)));
        packet.set_header_len(24);
        packet.set_ack(true);
        packet.set_window_len(2048);
        let options = packet.options_mut();
        options[0] = 253;
        options[1] = 0;
        packet.fill_checksum(&PEER, &LOCAL);
    }
    h.stack
        .rx(NetMsg::from_segment(&buffer, PEER, LOCAL).unwrap());
    h.assert_quiet();
}

#[test]
fn closing_a_listener_closes_queued_children() {
    let h = harness();
    let listener = h.stack.create_socket().unwrap();
    listener.bind(&SockAddrIn::new(LOCAL, 7000)).unwrap();
    listener.listen(4).unwrap();

    h.inject(7000, 100, None, 4096, TcpControl::Syn, &[]);
    let synack = h.pop();
    let child_iss = synack.seq;
    h.inject(7000, 101, Some(child_iss.wrapping_add(1)), 4096, TcpControl::None, &[]);
    assert_eq!(h.stack.socket_count(), 2);

    listener.close().unwrap();
    // The unaccepted child is shut down with a FIN of its own.
    let fin = h.pop();
    assert!(fin.fin);
    assert_eq!(fin.src_port, 7000);
    // Listener itself is gone; the child lingers to finish closing.
    assert_eq!(h.stack.socket_count(), 1);
    assert!(matches!(listener.accept(None), Err(Error::Invalid)));
}

#[test]
fn bulk_transfer_with_random_payload() {
    use rand::{Rng, SeedableRng};

    let h = harness();
    let (socket, port, iss) = establish(&h, 8192);

    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    let data: Vec<u8> = (0..4096).map(|_| rng.gen()).collect();

    let mut queued = 0;
    let mut received = Vec::new();
    let mut peer_acked = 0u32;
    while received.len() < data.len() {
        if queued < data.len() {
            queued += socket.send(&data[queued..]).unwrap_or(0);
        }
        while let Some(seg) = h.pop_maybe() {
            if seg.payload.is_empty() {
                continue;
            }
            // In-order delivery only; the harness peer never reorders.
            assert_eq!(seg.seq, iss.wrapping_add(1).wrapping_add(peer_acked));
            received.extend_from_slice(&seg.payload);
            peer_acked += seg.payload.len() as u32;
            h.inject(
                port,
                2,
                Some(iss.wrapping_add(1).wrapping_add(peer_acked)),
                8192,
                TcpControl::None,
                &[],
            );
        }
    }
    assert_eq!(received, data);
}
