use crate::tcp::{
    segment::Segment,
    seq::{mod_ge, mod_geq, mod_le, mod_leq},
};
use std::collections::VecDeque;
use tracing::trace;

/// Segments that arrived above `rcv.nxt`, held for reassembly.
///
/// The queue is kept sorted by sequence number with no overlapping payload
/// bytes; every insertion trims whatever is necessary to keep it that way. A
/// FIN supersedes everything queued behind it, since nothing past a FIN can
/// ever be delivered.
#[derive(Debug, Default)]
pub(crate) struct OutOfOrder {
    segments: VecDeque<Segment>,
}

/// End of the payload bytes in sequence space, ignoring control occupancy.
fn data_end(seg: &Segment) -> u32 {
    seg.seq().wrapping_add(seg.payload.len() as u32)
}

impl OutOfOrder {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    /// The starting sequence number of the first held segment.
    pub fn first_seq(&self) -> Option<u32> {
        self.segments.front().map(Segment::seq)
    }

    /// Pops the first held segment if it begins exactly at `rcv_nxt`.
    pub fn pop_contiguous(&mut self, rcv_nxt: u32) -> Option<Segment> {
        if self.segments.front()?.seq() == rcv_nxt {
            self.segments.pop_front()
        } else {
            None
        }
    }

    /// Drops every held segment whose bytes are entirely covered by the
    /// sequence numbers up to `end`. Returns whether any dropped segment
    /// carried a FIN, which the covering segment then takes over.
    pub fn remove_covered(&mut self, end: u32) -> bool {
        let mut fin = false;
        while let Some(front) = self.segments.front() {
            if mod_leq(front.end_seq(), end) {
                fin |= front.header.ctl.fin();
                self.segments.pop_front();
            } else {
                break;
            }
        }
        fin
    }

    /// Files an out-of-window-order segment into the queue.
    pub fn insert(&mut self, seg: Segment) {
        let seqno = seg.seq();

        let mut idx = 0;
        while idx < self.segments.len() {
            let held = &self.segments[idx];
            if seqno == held.seq() {
                // Same starting sequence number: keep whichever covers more
                if seg.seg_len() > held.seg_len() {
                    trace!(seqno, "Replacing shorter held segment");
                    self.segments[idx] = seg;
                    self.trim_after(idx);
                }
                return;
            }
            if mod_le(seqno, held.seq()) {
                if idx > 0 {
                    self.trim_tail_of(idx - 1, seqno);
                }
                self.segments.insert(idx, seg);
                self.trim_after(idx);
                return;
            }
            idx += 1;
        }

        // Belongs at the end
        if let Some(last) = self.segments.back() {
            if last.header.ctl.fin() {
                // Nothing past a queued FIN can matter
                return;
            }
            self.trim_tail_of(self.segments.len() - 1, seqno);
        }
        self.segments.push_back(seg);
    }

    /// Trims the payload of the held segment at `idx` so it ends at `seq`.
    fn trim_tail_of(&mut self, idx: usize, seq: u32) {
        let held = &mut self.segments[idx];
        if mod_ge(data_end(held), seq) {
            let keep = seq.wrapping_sub(held.seq()) as usize;
            held.payload.truncate(keep);
        }
    }

    /// Re-establishes ordering invariants to the right of a newly placed
    /// segment: following segments it covers are dropped (their FIN taken
    /// over), a partial overlap trims the newcomer, and a newcomer carrying
    /// FIN supersedes the rest of the queue.
    fn trim_after(&mut self, idx: usize) {
        if self.segments[idx].header.ctl.fin() {
            self.segments.truncate(idx + 1);
            return;
        }

        while idx + 1 < self.segments.len() {
            let end = data_end(&self.segments[idx]);
            let next = &self.segments[idx + 1];
            if mod_geq(end, data_end(next)) {
                if next.header.ctl.fin() {
                    self.segments[idx].header.ctl.set_fin(true);
                }
                self.segments.remove(idx + 1);
            } else if mod_ge(end, next.seq()) {
                let keep = next.seq().wrapping_sub(self.segments[idx].seq()) as usize;
                self.segments[idx].payload.truncate(keep);
                break;
            } else {
                break;
            }
        }
    }

    /// Sorted and non-overlapping, the invariant every mutation preserves.
    #[cfg(test)]
    pub fn is_sorted_nonoverlapping(&self) -> bool {
        self.segments
            .iter()
            .zip(self.segments.iter().skip(1))
            .all(|(a, b)| mod_leq(data_end(a), b.seq()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tcp::parsing::TcpHeaderBuilder, Message};

    fn seg(seq: u32, payload: &[u8]) -> Segment {
        let header = TcpHeaderBuilder::new(0xcafe, 0xbabe, seq).build().unwrap();
        Segment::new(header, Message::new(payload))
    }

    fn fin_seg(seq: u32, payload: &[u8]) -> Segment {
        let header = TcpHeaderBuilder::new(0xcafe, 0xbabe, seq)
            .fin()
            .build()
            .unwrap();
        Segment::new(header, Message::new(payload))
    }

    fn seqs(queue: &OutOfOrder) -> Vec<u32> {
        queue.iter().map(Segment::seq).collect()
    }

    #[test]
    fn keeps_arrivals_sorted() {
        let mut queue = OutOfOrder::default();
        queue.insert(seg(300, b"cc"));
        queue.insert(seg(100, b"aa"));
        queue.insert(seg(200, b"bb"));
        assert_eq!(seqs(&queue), vec![100, 200, 300]);
        assert!(queue.is_sorted_nonoverlapping());
    }

    #[test]
    fn equal_sequence_keeps_the_longer() {
        let mut queue = OutOfOrder::default();
        queue.insert(seg(100, b"abc"));
        queue.insert(seg(100, b"a"));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.iter().next().unwrap().payload.len(), 3);

        queue.insert(seg(100, b"abcdef"));
        assert_eq!(queue.iter().next().unwrap().payload.len(), 6);
    }

    #[test]
    fn overlapping_predecessor_is_trimmed() {
        let mut queue = OutOfOrder::default();
        queue.insert(seg(100, b"aaaaaaaaaa")); // [100, 110)
        queue.insert(seg(105, b"bbbbb")); // [105, 110)
        assert_eq!(seqs(&queue), vec![100, 105]);
        assert_eq!(queue.iter().next().unwrap().payload.len(), 5);
        assert!(queue.is_sorted_nonoverlapping());
    }

    #[test]
    fn covered_successors_are_dropped() {
        let mut queue = OutOfOrder::default();
        queue.insert(seg(110, b"bb"));
        queue.insert(seg(115, b"cc"));
        queue.insert(seg(100, &[0u8; 20])); // covers both
        assert_eq!(seqs(&queue), vec![100]);
        assert!(queue.is_sorted_nonoverlapping());
    }

    #[test]
    fn covering_takes_over_a_fin() {
        let mut queue = OutOfOrder::default();
        queue.insert(fin_seg(110, b"bb"));
        queue.insert(seg(100, &[0u8; 12])); // covers [110, 112)
        assert_eq!(queue.len(), 1);
        assert!(queue.iter().next().unwrap().header.ctl.fin());
    }

    #[test]
    fn partial_overlap_trims_the_newcomer() {
        let mut queue = OutOfOrder::default();
        queue.insert(seg(110, b"bbbbb")); // [110, 115)
        queue.insert(seg(100, &[0u8; 13])); // [100, 113), overlaps into 110
        assert_eq!(seqs(&queue), vec![100, 110]);
        assert_eq!(queue.iter().next().unwrap().payload.len(), 10);
        assert!(queue.is_sorted_nonoverlapping());
    }

    #[test]
    fn fin_supersedes_the_rest() {
        let mut queue = OutOfOrder::default();
        queue.insert(seg(200, b"cc"));
        queue.insert(seg(300, b"dd"));
        queue.insert(fin_seg(100, b"bb"));
        assert_eq!(seqs(&queue), vec![100]);
        assert!(queue.iter().next().unwrap().header.ctl.fin());
    }

    #[test]
    fn nothing_files_behind_a_fin() {
        let mut queue = OutOfOrder::default();
        queue.insert(fin_seg(100, b"bb"));
        queue.insert(seg(200, b"cc"));
        assert_eq!(seqs(&queue), vec![100]);
    }

    #[test]
    fn splicing() {
        let mut queue = OutOfOrder::default();
        queue.insert(seg(100, b"aa"));
        queue.insert(seg(102, b"bb"));
        queue.insert(seg(110, b"cc"));

        assert!(queue.pop_contiguous(99).is_none());
        assert_eq!(queue.pop_contiguous(100).unwrap().seq(), 100);
        assert_eq!(queue.pop_contiguous(102).unwrap().seq(), 102);
        assert!(queue.pop_contiguous(104).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn remove_covered_reports_fin() {
        let mut queue = OutOfOrder::default();
        queue.insert(seg(100, b"aa"));
        queue.insert(fin_seg(102, b"bb"));
        let fin = queue.remove_covered(105);
        assert!(fin);
        assert!(queue.is_empty());
    }
}
