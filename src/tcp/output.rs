//! The output scheduler.
//!
//! [flush] is the single place that decides whether queued data leaves
//! now or waits, combining the Nagle rule with sender-side silly-window
//! avoidance. It runs whenever the picture changes: data entered the
//! buffer, an acknowledgement moved the left edge or the peer window,
//! the congestion window grew, or a persist probe fired.

use crate::config::{MAX_DATA_RETRIES, RTO_MAX};
use crate::error::{Error, Result};
use crate::tcp::seg;
use crate::tcp::tcb::{State, Tcb};
use crate::tcp::Tcp;
use crate::time::Ticks;

fn may_transmit(state: State) -> bool {
    matches!(
        state,
        State::Established
            | State::CloseWait
            | State::FinWait1
            | State::Closing
            | State::LastAck
    )
}

/// Push out whatever the windows and the Nagle rule allow.
pub(crate) fn flush(stack: &Tcp, tcb: &mut Tcb) -> Result<()> {
    if !may_transmit(tcb.state) {
        return Ok(());
    }

    loop {
        let mss = tcb.smss;
        let usable = tcb.usable_window();
        let unsent = tcb.unsent_data();
        let len = unsent.min(usable).min(mss);
        if len == 0 {
            break;
        }

        // Send when a full segment is ready; when this empties the queue
        // and nothing small is outstanding (Nagle); or when at least half
        // the peer's best-ever window is on offer.
        let empties_queue = len == unsent && tcb.snd_nxt == tcb.snd_una;
        let half_best_window =
            tcb.max_wnd > 0 && unsent.min(usable) >= tcb.max_wnd / 2;
        if len < mss && !empties_queue && !half_best_window {
            break;
        }

        let mut payload = vec![0; len];
        tcb.tx_buffer.read_allocated(tcb.data_in_flight(), &mut payload);

        let fin = tcb.fin_queued && tcb.fin_seq.is_none() && len == unsent;
        let push = len == unsent;
        let seq = tcb.snd_nxt;
        seg::send_data(stack, tcb, seq, &payload, push, fin)?;

        if fin {
            tcb.fin_seq = Some(seq + len);
        }
        record_transmission(tcb, seq + len + fin as usize);
    }

    // A FIN with nothing (left) to piggyback on goes out bare.
    if tcb.fin_queued && tcb.fin_seq.is_none() && tcb.unsent_data() == 0 {
        let seq = tcb.snd_nxt;
        seg::send_data(stack, tcb, seq, &[], false, true)?;
        tcb.fin_seq = Some(seq);
        record_transmission(tcb, seq + 1);
    }

    // Data stuck behind a closed peer window: start probing, unless a
    // retransmission is already pending.
    if tcb.unsent_data() > 0
        && tcb.snd_wnd == 0
        && tcb.timers.persist.is_zero()
        && tcb.timers.retransmit.is_zero()
    {
        tcb.persist_backoff = tcb.rtte.rto();
        tcb.timers.persist = tcb.persist_backoff;
        net_debug!("tcp: {} window closed, persist in {}", tcb.quad, tcb.persist_backoff);
    }

    Ok(())
}

/// Bookkeeping after a transmission advanced `snd_nxt` to `new_nxt`:
/// track the high-water mark, time the first new segment in flight, and
/// make sure a loss timer runs.
fn record_transmission(tcb: &mut Tcb, new_nxt: crate::wire::TcpSeqNumber) {
    tcb.snd_nxt = new_nxt;
    if tcb.snd_nxt > tcb.snd_max {
        tcb.snd_max = tcb.snd_nxt;
        tcb.rtte.start(tcb.snd_nxt);
    }
    if tcb.timers.retransmit.is_zero() {
        tcb.timers.persist = Ticks::ZERO;
        tcb.timers.retransmit = tcb.rtte.rto();
    }
}

/// Re-send from the left window edge: up to one segment of payload,
/// plus our FIN when it is adjacent.
fn retransmit_head(stack: &Tcp, tcb: &mut Tcb) -> Result<()> {
    let data_len = tcb.data_in_flight().min(tcb.smss);
    let fin = tcb.fin_seq == Some(tcb.snd_una + data_len);
    if data_len == 0 && !fin {
        return Ok(());
    }
    let mut payload = vec![0; data_len];
    tcb.tx_buffer.read_allocated(0, &mut payload);
    seg::send_data(stack, tcb, tcb.snd_una, &payload, data_len > 0, fin)
}

/// Retransmission timer expiry. Returns `false` when the connection
/// exhausted its retries and the block must be dropped.
pub(crate) fn on_retransmit_timeout(stack: &Tcp, tcb: &mut Tcb) -> bool {
    tcb.retries += 1;
    if tcb.retries >= MAX_DATA_RETRIES {
        tcb.fail(Error::TimedOut);
        return false;
    }
    net_debug!(
        "tcp: {} retransmit #{} from {}, rto {}",
        tcb.quad,
        tcb.retries,
        tcb.snd_una,
        tcb.rtte.rto()
    );

    let _ = retransmit_head(stack, tcb);

    let flight = tcb.flight_size();
    tcb.cc.on_retransmit_timeout(tcb.smss, flight, tcb.snd_max);
    tcb.rtte.on_retransmit();
    tcb.timers.retransmit = tcb.rtte.rto();
    true
}

/// Third duplicate acknowledgement: re-send the head segment without
/// touching the retransmission timer or the estimator sample.
pub(crate) fn fast_retransmit(stack: &Tcp, tcb: &mut Tcb) -> Result<()> {
    net_debug!("tcp: {} fast retransmit from {}", tcb.quad, tcb.snd_una);
    retransmit_head(stack, tcb)
}

/// Persist timer expiry: force one octet of new data into the closed
/// window, or re-send the probe octet still outstanding, or fall back
/// to a bare acknowledgement. Probes are never timed for RTT and never
/// count against the retry cap; the interval backs off per probe.
pub(crate) fn send_window_probe(stack: &Tcp, tcb: &mut Tcb) -> Result<()> {
    if tcb.data_in_flight() > 0 {
        // The previous probe octet is still unacknowledged; repeat it.
        let mut octet = [0u8; 1];
        tcb.tx_buffer.read_allocated(0, &mut octet);
        seg::send_data(stack, tcb, tcb.snd_una, &octet, false, false)?;
    } else if tcb.unsent_data() > 0 {
        let mut octet = [0u8; 1];
        tcb.tx_buffer.read_allocated(tcb.data_in_flight(), &mut octet);
        let seq = tcb.snd_nxt;
        seg::send_data(stack, tcb, seq, &octet, false, false)?;
        tcb.snd_nxt = seq + 1;
        tcb.snd_max = tcb.snd_max.max(tcb.snd_nxt);
    } else {
        seg::send_probe_ack(stack, tcb)?;
    }

    tcb.persist_backoff = tcb.persist_backoff.backed_off(Ticks(RTO_MAX));
    tcb.timers.persist = tcb.persist_backoff;
    Ok(())
}
