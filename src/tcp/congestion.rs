//! Congestion control: slow start, congestion avoidance, fast
//! retransmit and fast recovery.
//!
//! The controller only tracks bytes and sequence marks; deciding what a
//! duplicate acknowledgement is, and actually retransmitting, belongs to
//! the input and output paths.

use crate::wire::TcpSeqNumber;

/// Initial slow-start threshold: effectively "no threshold" until the
/// first loss event sets a real one.
const INITIAL_SSTHRESH: usize = 65535;

#[derive(Debug)]
pub(crate) struct Congestion {
    cwnd: usize,
    ssthresh: usize,
    dupacks: u32,
    /// Highest sequence sent when the last loss event happened. An
    /// acknowledgement covering it ends fast recovery.
    recovery_point: TcpSeqNumber,
    in_recovery: bool,
    /// Congestion-avoidance byte counter: bumps `cwnd` by one segment
    /// each time it crosses it.
    bytes_acked: usize,
}

impl Congestion {
    pub fn new(smss: usize, iss: TcpSeqNumber) -> Congestion {
        Congestion {
            cwnd: smss,
            ssthresh: INITIAL_SSTHRESH,
            dupacks: 0,
            recovery_point: iss,
            in_recovery: false,
            bytes_acked: 0,
        }
    }

    /// The congestion window, in bytes.
    pub fn window(&self) -> usize {
        self.cwnd
    }

    #[cfg(test)]
    pub fn ssthresh(&self) -> usize {
        self.ssthresh
    }

    pub fn dupacks(&self) -> u32 {
        self.dupacks
    }

    /// An acknowledgement moved the left window edge: grow the window,
    /// or finish recovery if the loss episode is fully acknowledged.
    ///
    /// `acked` is the number of newly acknowledged payload bytes; growth
    /// never exceeds it.
    pub fn on_new_ack(&mut self, smss: usize, acked: usize, ack: TcpSeqNumber) {
        self.dupacks = 0;

        if self.in_recovery {
            if ack >= self.recovery_point {
                // Deflate back to the post-loss operating point.
                self.cwnd = self.ssthresh;
                self.in_recovery = false;
            }
            return;
        }

        if self.cwnd < self.ssthresh {
            self.cwnd += smss.min(acked);
        } else {
            self.bytes_acked += acked;
            if self.bytes_acked >= self.cwnd {
                self.bytes_acked -= self.cwnd;
                self.cwnd += smss;
            }
        }
    }

    /// A duplicate acknowledgement arrived. Returns true when it is the
    /// third in a row and the segment at the left window edge must be
    /// retransmitted.
    pub fn on_duplicate_ack(&mut self, smss: usize, flight: usize, snd_max: TcpSeqNumber) -> bool {
        self.dupacks += 1;

        if self.in_recovery {
            // Each further duplicate signals another segment left the
            // network; inflate to keep the pipe full.
            self.cwnd += smss;
            return false;
        }

        if self.dupacks == 3 {
            self.ssthresh = (2 * smss).max(flight / 2);
            self.cwnd = self.ssthresh + 3 * smss;
            self.in_recovery = true;
            self.recovery_point = snd_max;
            self.bytes_acked = 0;
            return true;
        }
        false
    }

    /// The retransmission timer expired: collapse to one segment and
    /// re-enter slow start. Any fast-recovery episode ends here.
    pub fn on_retransmit_timeout(&mut self, smss: usize, flight: usize, snd_max: TcpSeqNumber) {
        self.ssthresh = (2 * smss).max(flight / 2);
        self.cwnd = smss;
        self.dupacks = 0;
        self.bytes_acked = 0;
        self.in_recovery = false;
        self.recovery_point = snd_max;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const MSS: usize = 536;
    const ISS: TcpSeqNumber = TcpSeqNumber(1000);

    #[test]
    fn slow_start_growth() {
        let mut cc = Congestion::new(MSS, ISS);
        assert_eq!(cc.window(), MSS);

        cc.on_new_ack(MSS, MSS, ISS + MSS);
        assert_eq!(cc.window(), 2 * MSS);
        // Growth per acknowledgement is capped by the bytes it covers.
        cc.on_new_ack(MSS, 100, ISS + MSS + 100);
        assert_eq!(cc.window(), 2 * MSS + 100);
    }

    #[test]
    fn congestion_avoidance_counter() {
        let mut cc = Congestion::new(MSS, ISS);
        // Force avoidance: pretend the threshold is below the window.
        cc.ssthresh = MSS;

        // One segment per window's worth of acknowledged bytes.
        let start = cc.window();
        let mut acked = 0;
        while acked < start {
            cc.on_new_ack(MSS, MSS, ISS + acked);
            acked += MSS;
        }
        assert_eq!(cc.window(), start + MSS);
    }

    #[test]
    fn fast_retransmit_entry_and_inflation() {
        let mut cc = Congestion::new(MSS, ISS);
        cc.cwnd = 6 * MSS;
        let flight = 6 * MSS;
        let snd_max = ISS + flight;

        assert!(!cc.on_duplicate_ack(MSS, flight, snd_max));
        assert!(!cc.on_duplicate_ack(MSS, flight, snd_max));
        // Third duplicate: retransmit, halve, inflate by three.
        assert!(cc.on_duplicate_ack(MSS, flight, snd_max));
        assert_eq!(cc.ssthresh(), 3 * MSS);
        assert_eq!(cc.window(), 6 * MSS);

        assert!(!cc.on_duplicate_ack(MSS, flight, snd_max));
        assert_eq!(cc.window(), 7 * MSS);
        assert!(!cc.on_duplicate_ack(MSS, flight, snd_max));
        assert_eq!(cc.window(), 8 * MSS);

        // Full recovery deflates to the threshold.
        cc.on_new_ack(MSS, flight, snd_max);
        assert_eq!(cc.window(), 3 * MSS);
        assert_eq!(cc.dupacks(), 0);
    }

    #[test]
    fn partial_ack_stays_in_recovery() {
        let mut cc = Congestion::new(MSS, ISS);
        cc.cwnd = 6 * MSS;
        let flight = 6 * MSS;
        let snd_max = ISS + flight;
        for _ in 0..3 {
            cc.on_duplicate_ack(MSS, flight, snd_max);
        }
        assert!(cc.in_recovery);

        cc.on_new_ack(MSS, MSS, ISS + MSS);
        assert!(cc.in_recovery);
        cc.on_new_ack(MSS, flight - MSS, snd_max);
        assert!(!cc.in_recovery);
        assert_eq!(cc.window(), cc.ssthresh());
    }

    #[test]
    fn timeout_collapses_to_one_segment() {
        let mut cc = Congestion::new(MSS, ISS);
        cc.cwnd = 8 * MSS;
        for _ in 0..3 {
            cc.on_duplicate_ack(MSS, 8 * MSS, ISS + 8 * MSS);
        }
        assert!(cc.in_recovery);

        cc.on_retransmit_timeout(MSS, 8 * MSS, ISS + 8 * MSS);
        assert!(!cc.in_recovery);
        assert_eq!(cc.window(), MSS);
        assert_eq!(cc.ssthresh(), 4 * MSS);
        assert_eq!(cc.dupacks(), 0);
    }

    #[test]
    fn threshold_floor_is_two_segments() {
        let mut cc = Congestion::new(MSS, ISS);
        cc.on_retransmit_timeout(MSS, MSS, ISS + MSS);
        assert_eq!(cc.ssthresh(), 2 * MSS);
    }
}
