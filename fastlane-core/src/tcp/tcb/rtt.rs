use crate::tcp::seq::mod_le;
use tracing::trace;

/// The retransmission timeout a fresh connection starts with, in ticks.
pub const RTO_INITIAL: i32 = 6;
/// The retransmission timeout never backs off beyond this, in ticks.
pub const RTO_MAX: i32 = 120;

/// Van Jacobson round-trip estimation over coarse timer ticks.
///
/// `sa` is the smoothed average scaled by 8 and `sv` the smoothed variance
/// scaled by 4, so the arithmetic stays integral. At most one measurement is
/// in flight at a time; an acknowledgment covering the measured sequence
/// number closes it. Retransmission cancels the measurement so an ambiguous
/// sample is never taken.
#[derive(Debug, Clone, Copy)]
pub struct RttEstimator {
    sa: i32,
    sv: i32,
    rto: i32,
    /// The tick the measured segment was sent and its sequence number
    measurement: Option<(u32, u32)>,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self {
            sa: 0,
            sv: RTO_INITIAL,
            rto: RTO_INITIAL,
            measurement: None,
        }
    }
}

impl RttEstimator {
    /// The current retransmission timeout in ticks.
    pub fn rto(&self) -> i32 {
        self.rto
    }

    /// Starts a measurement on the given sequence number if none is running.
    pub fn start(&mut self, now: u32, seq: u32) {
        if self.measurement.is_none() {
            self.measurement = Some((now, seq));
        }
    }

    /// Whether a measurement is in flight.
    pub fn is_measuring(&self) -> bool {
        self.measurement.is_some()
    }

    /// Feeds an acceptable acknowledgment. Takes a sample if it covers the
    /// measured sequence number.
    pub fn on_ack(&mut self, now: u32, ackno: u32) {
        if let Some((sent_at, rtseq)) = self.measurement {
            if mod_le(rtseq, ackno) {
                let mut m = now.wrapping_sub(sent_at) as i32;
                trace!(sample = m, "RTT sample");

                // Update per Van Jacobson, Congestion Avoidance and Control
                m -= self.sa >> 3;
                self.sa += m;
                if m < 0 {
                    m = -m;
                }
                m -= self.sv >> 2;
                self.sv += m;
                self.rto = (self.sa >> 3) + self.sv;

                self.measurement = None;
            }
        }
    }

    /// Resets the timeout to the estimate after an acknowledgment of new
    /// data, undoing any backoff.
    pub fn refresh(&mut self) {
        self.rto = (self.sa >> 3) + self.sv;
    }

    /// Doubles the timeout after an expiry and cancels the in-flight
    /// measurement (Karn's algorithm).
    pub fn backoff(&mut self) {
        self.rto = (self.rto * 2).min(RTO_MAX);
        self.measurement = None;
    }

    /// Cancels the in-flight measurement without touching the timeout.
    pub fn cancel(&mut self) {
        self.measurement = None;
    }
}
