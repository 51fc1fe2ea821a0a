//! Outbound segment construction.
//!
//! Every segment leaves through [transmit]: representation in, message
//! buffer out, handed to the IP layer. The helpers fill the canonical
//! shapes and keep the advertised-window bookkeeping in one place: any
//! segment that carries an acknowledgement also records what window it
//! advertised and makes a pending delayed ACK unnecessary.

use crate::error::Result;
use crate::pkbuf::NetMsg;
use crate::tcp::input::SegmentView;
use crate::tcp::tcb::Tcb;
use crate::tcp::Tcp;
use crate::time::Ticks;
use crate::wire::ipv4::Address;
use crate::wire::{TcpControl, TcpPacket, TcpRepr, TcpSeqNumber};

fn transmit(stack: &Tcp, repr: &TcpRepr, src: Address, dst: Address) -> Result<()> {
    let mut msg = NetMsg::alloc(repr.buffer_len())?;
    msg.ip_src = src;
    msg.ip_dst = dst;
    {
        let mut packet = TcpPacket::new_unchecked(msg.segment_mut());
        repr.emit(&mut packet, &src, &dst);
    }
    net_trace!("tcp: tx {} -> {} {}", src, dst, repr);
    stack.ip().lock().unwrap().ip_tx(msg);
    Ok(())
}

/// Note that an outgoing segment acknowledged up to `rcv_nxt` with the
/// given window: the advertised edge moved and any delayed ACK is moot.
fn note_ack_sent(tcb: &mut Tcb, window: usize) {
    tcb.note_advertised(window);
    tcb.timers.delayed_ack = Ticks::ZERO;
}

/// SYN, or SYN-ACK when `with_ack`. Re-sent as-is on the connection
/// timer: the sequence number stays at ISS.
pub(crate) fn send_syn(stack: &Tcp, tcb: &mut Tcb, with_ack: bool) -> Result<()> {
    let window = tcb.window_to_advertise();
    let repr = TcpRepr {
        src_port: tcb.quad.local.port,
        dst_port: tcb.quad.foreign.port,
        control: TcpControl::Syn,
        push: false,
        seq_number: tcb.iss,
        ack_number: with_ack.then_some(tcb.rcv_nxt),
        window_len: window as u16,
        max_seg_size: Some(tcb.mss_to_advertise),
        payload: &[],
    };
    if with_ack {
        note_ack_sent(tcb, window);
    }
    transmit(stack, &repr, tcb.quad.local.addr, tcb.quad.foreign.addr)
}

/// A data-bearing segment at `seq`, or a FIN, or both; with an empty
/// payload and no FIN this is the pure ACK.
pub(crate) fn send_data(
    stack: &Tcp,
    tcb: &mut Tcb,
    seq: TcpSeqNumber,
    payload: &[u8],
    push: bool,
    fin: bool,
) -> Result<()> {
    let window = tcb.window_to_advertise();
    let repr = TcpRepr {
        src_port: tcb.quad.local.port,
        dst_port: tcb.quad.foreign.port,
        control: if fin { TcpControl::Fin } else { TcpControl::None },
        push,
        seq_number: seq,
        ack_number: Some(tcb.rcv_nxt),
        window_len: window as u16,
        max_seg_size: None,
        payload,
    };
    note_ack_sent(tcb, window);
    transmit(stack, &repr, tcb.quad.local.addr, tcb.quad.foreign.addr)
}

/// The empty acknowledgement of the current receive state.
pub(crate) fn send_ack(stack: &Tcp, tcb: &mut Tcb) -> Result<()> {
    send_data(stack, tcb, tcb.snd_nxt, &[], false, false)
}

/// A zero-length probe one octet behind the left send edge, used when a
/// window must be probed but no data is queued.
pub(crate) fn send_probe_ack(stack: &Tcp, tcb: &mut Tcb) -> Result<()> {
    let seq = TcpSeqNumber(tcb.snd_nxt.0.wrapping_sub(1));
    send_data(stack, tcb, seq, &[], false, false)
}

/// The reset answering an unwanted segment, in the shape RFC 793 asks
/// for: mirror the acknowledgement if there was one, otherwise
/// acknowledge everything the segment occupied.
pub(crate) fn reply_rst(stack: &Tcp, seg: &SegmentView) -> Result<()> {
    if seg.repr.control == TcpControl::Rst {
        return Ok(());
    }
    let repr = match seg.repr.ack_number {
        Some(ack) => TcpRepr {
            src_port: seg.repr.dst_port,
            dst_port: seg.repr.src_port,
            control: TcpControl::Rst,
            push: false,
            seq_number: ack,
            ack_number: None,
            window_len: 0,
            max_seg_size: None,
            payload: &[],
        },
        None => TcpRepr {
            src_port: seg.repr.dst_port,
            dst_port: seg.repr.src_port,
            control: TcpControl::Rst,
            push: false,
            seq_number: TcpSeqNumber(0),
            ack_number: Some(seg.repr.seq_number + seg.repr.segment_len()),
            window_len: 0,
            max_seg_size: None,
            payload: &[],
        },
    };
    transmit(stack, &repr, seg.dst_addr, seg.src_addr)
}
