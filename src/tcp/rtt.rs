//! Round-trip estimation and the retransmission timeout.
//!
//! One segment at a time is timed. The smoothed estimate and its
//! deviation are kept scaled by `1 << SRTT_SHIFT` so the exponential
//! averages stay in integer arithmetic, and the resulting timeout is
//! clamped into `[RTO_MIN, RTO_MAX]`. Retransmitted segments and window
//! probes are never sampled (Karn's rule): their acknowledgements are
//! ambiguous.

use crate::config::{RTO_MAX, RTO_MIN};
use crate::time::Ticks;
use crate::wire::TcpSeqNumber;

pub(crate) const SRTT_SHIFT: u32 = 3;

#[derive(Debug)]
pub(crate) struct RttEstimator {
    /// Smoothed round-trip time, scaled by `1 << SRTT_SHIFT`.
    srtt: u32,
    /// Mean deviation, same scaling.
    rttvar: u32,
    rto: Ticks,
    has_sample: bool,
    /// End of the segment being timed; an acknowledgement covering it
    /// completes the sample.
    timed_seq: Option<TcpSeqNumber>,
    /// Ticks since the timed segment left.
    elapsed: u32,
}

impl RttEstimator {
    pub fn new() -> RttEstimator {
        RttEstimator {
            srtt: 0,
            rttvar: 0,
            rto: Ticks(RTO_MIN),
            has_sample: false,
            timed_seq: None,
            elapsed: 0,
        }
    }

    pub fn rto(&self) -> Ticks {
        self.rto
    }

    #[cfg(test)]
    pub fn is_timing(&self) -> bool {
        self.timed_seq.is_some()
    }

    /// Begin timing a transmission ending at `seq_end`, unless a segment
    /// is already being timed.
    pub fn start(&mut self, seq_end: TcpSeqNumber) {
        if self.timed_seq.is_none() {
            self.timed_seq = Some(seq_end);
            self.elapsed = 0;
        }
    }

    /// One TCP clock tick elapsed.
    pub fn on_tick(&mut self) {
        if self.timed_seq.is_some() {
            self.elapsed += 1;
        }
    }

    /// The timed segment was retransmitted, or the timer it depends on
    /// expired: discard the sample and back the timeout off.
    pub fn on_retransmit(&mut self) {
        self.timed_seq = None;
        self.rto = self.rto.backed_off(Ticks(RTO_MAX));
    }

    /// An acknowledgement up to `ack` arrived; if it covers the timed
    /// segment, fold the measurement in.
    pub fn on_ack(&mut self, ack: TcpSeqNumber) {
        if let Some(seq_end) = self.timed_seq {
            if ack >= seq_end {
                let measurement = self.elapsed;
                self.timed_seq = None;
                self.sample(measurement);
            }
        }
    }

    fn sample(&mut self, r: u32) {
        // The max(1, 4*RTTVAR) floor belongs to the first measurement
        // only; afterwards the timeout is srtt + 4*rttvar as computed.
        let rto = if !self.has_sample {
            self.srtt = r << SRTT_SHIFT;
            self.rttvar = r << (SRTT_SHIFT - 1);
            self.has_sample = true;
            (self.srtt >> SRTT_SHIFT) + u32::max(1, self.rttvar >> (SRTT_SHIFT - 2))
        } else {
            // RTTVAR first, from the pre-update SRTT.
            let diff = (self.srtt >> SRTT_SHIFT).abs_diff(r);
            self.rttvar = self.rttvar - (self.rttvar >> 2) + (diff << (SRTT_SHIFT - 2));
            self.srtt = self.srtt - (self.srtt >> SRTT_SHIFT) + r;
            (self.srtt >> SRTT_SHIFT) + (self.rttvar >> (SRTT_SHIFT - 2))
        };
        self.rto = Ticks(rto).clamp(Ticks(RTO_MIN), Ticks(RTO_MAX));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_sample() {
        let mut rtte = RttEstimator::new();
        assert_eq!(rtte.rto(), Ticks(RTO_MIN));

        rtte.start(TcpSeqNumber(100));
        for _ in 0..8 {
            rtte.on_tick();
        }
        rtte.on_ack(TcpSeqNumber(100));
        assert!(!rtte.is_timing());
        // srtt = 8, rttvar = 4: rto = 8 + 4*4 = 24 ticks.
        assert_eq!(rtte.rto(), Ticks(24));
    }

    #[test]
    fn subsequent_samples_drop_the_variance_floor() {
        let mut rtte = RttEstimator::new();
        rtte.start(TcpSeqNumber(100));
        for _ in 0..8 {
            rtte.on_tick();
        }
        rtte.on_ack(TcpSeqNumber(100));
        assert_eq!(rtte.rto(), Ticks(24));

        // An identical second measurement: rttvar decays by a quarter,
        // giving rto = 8 + 4*3 = 20 with no floor term folded in.
        rtte.start(TcpSeqNumber(200));
        for _ in 0..8 {
            rtte.on_tick();
        }
        rtte.on_ack(TcpSeqNumber(200));
        assert_eq!(rtte.rto(), Ticks(20));
    }

    #[test]
    fn steady_samples_converge() {
        let mut rtte = RttEstimator::new();
        for round in 0..20u32 {
            let seq = TcpSeqNumber(round * 100);
            rtte.start(seq);
            for _ in 0..4 {
                rtte.on_tick();
            }
            rtte.on_ack(seq);
        }
        // With a constant measurement the variance decays and the
        // timeout settles a little above the measurement itself.
        assert!(rtte.rto() >= Ticks(RTO_MIN));
        assert!(rtte.rto() <= Ticks(4 + 8));
    }

    #[test]
    fn partial_ack_keeps_timing() {
        let mut rtte = RttEstimator::new();
        rtte.start(TcpSeqNumber(500));
        rtte.on_tick();
        rtte.on_ack(TcpSeqNumber(400));
        assert!(rtte.is_timing());
        rtte.on_ack(TcpSeqNumber(500));
        assert!(!rtte.is_timing());
    }

    #[test]
    fn one_timed_segment_at_a_time() {
        let mut rtte = RttEstimator::new();
        rtte.start(TcpSeqNumber(100));
        rtte.on_tick();
        // A later transmission does not displace the running sample.
        rtte.start(TcpSeqNumber(200));
        rtte.on_ack(TcpSeqNumber(100));
        assert!(!rtte.is_timing());
    }

    #[test]
    fn karn_discards_on_retransmit() {
        let mut rtte = RttEstimator::new();
        rtte.start(TcpSeqNumber(100));
        rtte.on_tick();
        rtte.on_retransmit();
        assert!(!rtte.is_timing());
        assert_eq!(rtte.rto(), Ticks(2 * RTO_MIN));
        // The late acknowledgement of the retransmitted segment is not
        // taken as a sample.
        rtte.on_ack(TcpSeqNumber(100));
        assert_eq!(rtte.rto(), Ticks(2 * RTO_MIN));
    }

    #[test]
    fn backoff_is_clamped() {
        let mut rtte = RttEstimator::new();
        for _ in 0..12 {
            rtte.on_retransmit();
        }
        assert_eq!(rtte.rto(), Ticks(RTO_MAX));
    }

    #[test]
    fn sub_tick_sample_clamps_to_floor() {
        let mut rtte = RttEstimator::new();
        rtte.start(TcpSeqNumber(10));
        rtte.on_ack(TcpSeqNumber(10));
        assert_eq!(rtte.rto(), Ticks(RTO_MIN));
    }
}
