//! Pluggable congestion control.
//!
//! The receive processor and the retransmit timer call into a [`Congestion`]
//! implementation at fixed points; the implementation only adjusts the
//! congestion window and slow-start threshold. [`Reno`] is the default.
//! [`NoCongestion`] pins the window effectively unbounded, for paths where
//! the fabric is lossless and congestion control only costs throughput.

use std::fmt::Debug;

/// Whether an acknowledgment moved the left window edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// The acknowledgment covered new data
    New,
    /// A duplicate past the one that triggered fast retransmit
    Duplicate,
}

/// The variables a congestion controller owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CongestionState {
    /// The congestion window in bytes
    pub cwnd: u32,
    /// The slow-start threshold in bytes
    pub ssthresh: u32,
}

impl CongestionState {
    pub fn new(cwnd: u32, ssthresh: u32) -> Self {
        Self { cwnd, ssthresh }
    }
}

/// Congestion-control hook points.
///
/// `flight` arguments are the current effective window,
/// min(send window, congestion window).
pub trait Congestion: Debug {
    /// The connection reached ESTABLISHED.
    fn on_connection_init(&self, cc: &mut CongestionState, mss: u32);

    /// An acceptable acknowledgment arrived.
    fn on_ack_received(&self, cc: &mut CongestionState, mss: u32, kind: AckKind);

    /// The third duplicate acknowledgment arrived; fast retransmit is about
    /// to be performed and fast recovery entered.
    fn on_duplicate_ack(&self, cc: &mut CongestionState, mss: u32, flight: u32);

    /// An acknowledgment of new data ended fast recovery.
    fn on_post_recovery(&self, cc: &mut CongestionState);

    /// The retransmission timer expired.
    fn on_retransmission_timeout(&self, cc: &mut CongestionState, mss: u32, flight: u32) {
        cc.ssthresh = (flight / 2).max(2 * mss);
        cc.cwnd = mss;
    }
}

/// Classic slow start, congestion avoidance, and fast recovery.
#[derive(Debug, Default, Clone, Copy)]
pub struct Reno;

impl Congestion for Reno {
    fn on_connection_init(&self, cc: &mut CongestionState, mss: u32) {
        cc.cwnd = if cc.cwnd == 1 { mss * 2 } else { mss };
    }

    fn on_ack_received(&self, cc: &mut CongestionState, mss: u32, kind: AckKind) {
        match kind {
            AckKind::New => {
                if cc.cwnd < cc.ssthresh {
                    cc.cwnd = cc.cwnd.saturating_add(mss);
                } else {
                    let increase = (mss * mss / cc.cwnd).max(1);
                    cc.cwnd = cc.cwnd.saturating_add(increase);
                }
            }
            // Each further duplicate means another segment left the network
            AckKind::Duplicate => cc.cwnd = cc.cwnd.saturating_add(mss),
        }
    }

    fn on_duplicate_ack(&self, cc: &mut CongestionState, mss: u32, flight: u32) {
        cc.ssthresh = (flight / 2).max(2 * mss);
        cc.cwnd = cc.ssthresh + 3 * mss;
    }

    fn on_post_recovery(&self, cc: &mut CongestionState) {
        cc.cwnd = cc.ssthresh;
    }
}

/// No congestion control: the window never constrains transmission.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCongestion;

impl Congestion for NoCongestion {
    fn on_connection_init(&self, cc: &mut CongestionState, _mss: u32) {
        cc.cwnd = u32::MAX / 2;
        cc.ssthresh = u32::MAX / 2;
    }

    fn on_ack_received(&self, _cc: &mut CongestionState, _mss: u32, _kind: AckKind) {}

    fn on_duplicate_ack(&self, _cc: &mut CongestionState, _mss: u32, _flight: u32) {}

    fn on_post_recovery(&self, _cc: &mut CongestionState) {}

    fn on_retransmission_timeout(&self, _cc: &mut CongestionState, _mss: u32, _flight: u32) {}
}
