//! The receive processor: acknowledgment accounting, window updates, and
//! in-order data extraction for segments that passed the state machine's
//! acceptability checks.

use super::{Flags, Inbound, Tcb};
use crate::tcp::{
    congestion::AckKind,
    segment::Segment,
    seq::{mod_bounded, mod_ge, mod_le, Leq},
};
use tracing::trace;

/// End of the payload bytes in sequence space, ignoring control occupancy.
fn data_end(seg: &Segment) -> u32 {
    seg.seq().wrapping_add(seg.payload.len() as u32)
}

impl Tcb {
    /// Updates the send side from the acknowledgment and window fields, then
    /// extracts whatever in-order data the segment completes.
    pub(crate) fn receive(&mut self, inbound: &mut Inbound, now: u32) {
        if inbound.seg.header.ctl.ack() {
            self.receive_ack(inbound, now);
        }
        self.receive_data(inbound);
    }

    fn receive_ack(&mut self, inbound: &mut Inbound, now: u32) {
        let seqno = inbound.seg.seq();
        let ackno = inbound.seg.header.ack;
        let tcplen = inbound.seg.seg_len();
        let wnd = (inbound.seg.header.wnd as u32) << self.snd_scale;

        // Where the send window ended before this segment; an exact duplicate
        // acknowledgment must not have moved it
        let right_wnd_edge = self.snd.wnd.wrapping_add(self.snd.wl2);

        // Window update: a newer segment, the same segment with a newer
        // acknowledgment, or the same acknowledgment opening the window
        if mod_le(self.snd.wl1, seqno)
            || (self.snd.wl1 == seqno && mod_le(self.snd.wl2, ackno))
            || (self.snd.wl2 == ackno && wnd > self.snd.wnd)
        {
            self.snd.wnd = wnd;
            self.snd.wnd_max = self.snd.wnd_max.max(wnd);
            self.snd.wl1 = seqno;
            self.snd.wl2 = ackno;
            if self.snd.wnd == 0 {
                if self.persist_backoff == 0 {
                    trace!(id = %self.id, "Send window closed, arming zero window probing");
                    self.persist_backoff = 1;
                }
            } else if self.persist_backoff > 0 {
                self.persist_backoff = 0;
            }
        }

        if ackno == self.snd.una {
            // Nothing new. A bare segment that also left the window alone is
            // the peer asking for a retransmission.
            if tcplen == 0
                && self.snd.wl2.wrapping_add(self.snd.wnd) == right_wnd_edge
                && self.rtime >= 0
                && !self.unacked.is_empty()
            {
                self.dupacks = self.dupacks.saturating_add(1);
                if self.dupacks == 3 {
                    self.rexmit_fast();
                } else if self.dupacks > 3 {
                    self.congestion_ack(AckKind::Duplicate);
                }
            }
        } else if mod_bounded(
            self.snd.una.wrapping_add(1),
            Leq,
            ackno,
            Leq,
            self.snd.nxt,
        ) {
            // The acknowledgment covers new data
            if self.flags.contains(Flags::INFR) {
                self.flags.remove(Flags::INFR);
                self.congestion_post_recovery();
            }
            self.nrtx = 0;
            self.rtt.refresh();

            self.acked = ackno.wrapping_sub(self.snd.una);
            self.dupacks = 0;
            self.snd.una = ackno;

            if self.state.is_synchronized() {
                self.congestion_ack(AckKind::New);
            }

            let unacked = self.unacked.ack_through(ackno);
            // Retransmission reordering can leave covered segments unsent
            let unsent = self.unsent.ack_through(ackno);
            let freed = unacked.freed + unsent.freed;
            let fins = unacked.fins + unsent.fins;
            self.snd_queuelen -= freed.min(self.snd_queuelen);

            // Control slots are not application payload
            self.acked = self.acked.saturating_sub(fins);
            self.snd_buf = (self.snd_buf + self.acked).min(self.config.send_buffer);

            self.rtime = if self.unacked.is_empty() { -1 } else { 0 };
        } else if mod_le(self.snd.nxt, ackno) {
            // An acknowledgment of the future; answer with the present
            trace!(id = %self.id, ackno, nxt = self.snd.nxt, "Acknowledgment beyond snd.nxt");
            self.send_empty_ack();
        }

        self.rtt.on_ack(now, ackno);
    }

    fn receive_data(&mut self, inbound: &mut Inbound) {
        let tcplen = inbound.seg.seg_len();
        let seqno = inbound.seg.seq();

        if tcplen == 0 {
            // An empty segment from outside the window still gets an answer
            if !mod_bounded(
                self.rcv.nxt,
                Leq,
                seqno,
                Leq,
                self.rcv.nxt.wrapping_add(self.rcv.wnd).wrapping_sub(1),
            ) {
                self.ack_now();
            }
            return;
        }

        if !self.state.accepts_data() {
            return;
        }

        // Trim a leading overlap with data we already have
        if mod_bounded(
            seqno.wrapping_add(1),
            Leq,
            self.rcv.nxt,
            Leq,
            seqno.wrapping_add(tcplen).wrapping_sub(1),
        ) {
            let off = self.rcv.nxt.wrapping_sub(seqno) as usize;
            let _ = inbound.seg.payload.remove_front(off.min(inbound.seg.payload.len()));
            inbound.seg.header.seq = self.rcv.nxt;
        } else if mod_le(seqno, self.rcv.nxt) {
            // Entirely a duplicate; the peer missed our acknowledgment
            trace!(id = %self.id, seqno, "Duplicate segment");
            self.ack_now();
            return;
        }

        let seqno = inbound.seg.seq();
        if mod_bounded(
            self.rcv.nxt,
            Leq,
            seqno,
            Leq,
            self.rcv.nxt.wrapping_add(self.rcv.wnd).wrapping_sub(1),
        ) {
            if seqno == self.rcv.nxt {
                self.receive_in_order(inbound);
            } else {
                // A gap: acknowledge what we do have and hold the segment
                trace!(id = %self.id, seqno, nxt = self.rcv.nxt, "Out of order segment");
                self.send_empty_ack();
                self.clip_to_window(&mut inbound.seg);
                self.ooseq.insert(inbound.seg.clone());
            }
        } else {
            self.send_empty_ack();
        }
    }

    /// Accepts a segment starting exactly at `rcv.nxt`: reconcile it with the
    /// reassembly queue, advance the window, splice in whatever held segments
    /// it makes contiguous.
    fn receive_in_order(&mut self, inbound: &mut Inbound) {
        self.clip_to_window(&mut inbound.seg);

        if inbound.seg.header.ctl.fin() {
            // Nothing held above an in-order FIN can ever be delivered
            self.ooseq.clear();
        } else if !self.ooseq.is_empty() {
            if self.ooseq.remove_covered(data_end(&inbound.seg)) {
                inbound.seg.header.ctl.set_fin(true);
            }
            if let Some(first) = self.ooseq.first_seq() {
                if mod_ge(data_end(&inbound.seg), first) {
                    let keep = first.wrapping_sub(inbound.seg.seq()) as usize;
                    let _ = inbound.seg.payload.truncate(keep);
                }
            }
        }

        let tcplen = inbound.seg.seg_len();
        self.rcv.nxt = inbound.seg.seq().wrapping_add(tcplen);
        self.rcv.wnd = self.rcv.wnd.saturating_sub(tcplen);

        let mut got_fin = inbound.seg.header.ctl.fin();
        let mut delivered = std::mem::take(&mut inbound.seg.payload);
        let mut spliced = false;

        while let Some(held) = self.ooseq.pop_contiguous(self.rcv.nxt) {
            let len = held.seg_len();
            trace!(id = %self.id, seq = held.seq(), "Splicing held segment");
            self.rcv.nxt = self.rcv.nxt.wrapping_add(len);
            self.rcv.wnd = self.rcv.wnd.saturating_sub(len);
            got_fin |= held.header.ctl.fin();
            delivered.concatenate(held.payload);
            spliced = true;
        }

        inbound.got_fin = got_fin;
        if !delivered.is_empty() {
            inbound.recv_data = Some(delivered);
        }

        if spliced || !self.ooseq.is_empty() {
            // The peer is resending around a loss; answer immediately
            self.ack_now();
        } else if self.config.quickack
            && (self.config.quickack_threshold == 0
                || tcplen <= self.config.quickack_threshold)
        {
            self.ack_now();
        } else {
            self.ack_delayed();
        }
    }

    /// Clips payload that runs past the right window edge. A FIN past the
    /// clip point has not really arrived.
    fn clip_to_window(&mut self, seg: &mut Segment) {
        let limit = self.rcv.nxt.wrapping_add(self.rcv.wnd);
        if mod_ge(data_end(seg), limit) {
            let keep = limit.wrapping_sub(seg.seq()) as usize;
            trace!(id = %self.id, seq = seg.seq(), keep, "Clipping segment to the window");
            let _ = seg.payload.truncate(keep.min(seg.payload.len()));
            seg.header.ctl.set_fin(false);
        }
    }
}
