use crate::tcp::{
    segment::Segment,
    seq::{mod_le, mod_leq},
};
use std::collections::VecDeque;
use tracing::trace;

/// A queued segment and whether it still needs to go to the wire.
#[derive(Debug, Clone)]
pub(crate) struct Transmit {
    pub segment: Segment,
    pub needs_transmit: bool,
}

impl Transmit {
    pub fn new(segment: Segment) -> Self {
        Self {
            segment,
            needs_transmit: true,
        }
    }
}

/// What an acknowledgment sweep released.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AckSweep {
    /// Total capacity of the buffers released outright
    pub freed: usize,
    /// How many FIN-bearing segments were acknowledged whole
    pub fins: u32,
}

/// An ordered queue of segments awaiting acknowledgment (or first
/// transmission), oldest first.
#[derive(Debug, Default)]
pub(crate) struct SegmentQueue {
    segments: VecDeque<Transmit>,
}

impl SegmentQueue {
    pub fn push(&mut self, transmit: Transmit) {
        self.segments.push_back(transmit);
    }

    pub fn pop_front(&mut self) -> Option<Transmit> {
        self.segments.pop_front()
    }

    pub fn front(&self) -> Option<&Transmit> {
        self.segments.front()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transmit> {
        self.segments.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Transmit> {
        self.segments.iter_mut()
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    /// The total size of the payload buffers the queue holds.
    pub fn capacity(&self) -> usize {
        self.segments.iter().map(|t| t.segment.capacity()).sum()
    }

    /// Flags every segment for transmission, for timeout retransmission.
    pub fn mark_all(&mut self) {
        for transmit in self.segments.iter_mut() {
            transmit.needs_transmit = true;
        }
    }

    /// Flags only the oldest segment, for fast retransmit.
    pub fn mark_front(&mut self) {
        if let Some(front) = self.segments.front_mut() {
            front.needs_transmit = true;
        }
    }

    /// Releases everything the acknowledgment covers.
    ///
    /// Fully covered segments are freed from the front. A partially covered
    /// segment is shrunk in place: its payload loses the acknowledged bytes
    /// (releasing any buffer emptied by that) and its sequence number moves
    /// up to the acknowledgment. A FIN-bearing segment is never shrunk; it
    /// stays whole until covered entirely. The walk stops at the first
    /// segment the acknowledgment does not reach into.
    pub fn ack_through(&mut self, ackno: u32) -> AckSweep {
        let mut sweep = AckSweep::default();

        while let Some(front) = self.segments.front_mut() {
            let seg = &mut front.segment;
            if !mod_le(seg.seq(), ackno) {
                break;
            }
            if mod_leq(seg.end_seq(), ackno) {
                if seg.header.ctl.fin() {
                    sweep.fins += 1;
                }
                sweep.freed += seg.capacity();
                trace!(seq = seg.seq(), "Freeing acknowledged segment");
                self.segments.pop_front();
            } else {
                if seg.header.ctl.fin() || seg.header.ctl.syn() {
                    break;
                }
                let advance = ackno.wrapping_sub(seg.seq()) as usize;
                sweep.freed += seg.payload.remove_front(advance);
                seg.header.seq = ackno;
                trace!(seq = ackno, advance, "Shrinking partially acknowledged segment");
                break;
            }
        }

        sweep
    }
}
