use super::{
    congestion::{Congestion, CongestionState, Reno},
    events::{Delivery, SocketError, SocketEvents, Verdict},
    options,
    parsing::{TcpHeader, TcpHeaderBuilder},
    segment::Segment,
    seq::{mod_bounded, mod_geq, mod_le, Le, Leq},
};
use crate::{
    endpoint::{Address, ConnectionId, Endpoint},
    Message,
};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use tracing::{debug, trace};

mod ooseq;
mod receive;
mod receive_space;
mod retransmit;
mod rtt;
mod send_space;
mod state;
#[cfg(test)]
mod tests;

use ooseq::OutOfOrder;
use receive_space::ReceiveSequenceSpace;
use retransmit::{SegmentQueue, Transmit};
use send_space::SendSequenceSpace;

pub use rtt::RttEstimator;
pub use state::State;

/// The maximum segment lifetime in timer ticks. TIME_WAIT holds a record for
/// twice this long.
pub const MSL: u32 = 120;

/// Zero-window probe intervals in ticks, one per backoff step.
const PERSIST_INTERVALS: [u8; 7] = [3, 6, 12, 24, 48, 96, 120];

/// Per-connection policy knobs, fixed at open time.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// The largest segment we are willing to receive and the ceiling for the
    /// effective send MSS
    pub mss: u32,
    /// The receive window in bytes
    pub window: u32,
    /// The send buffer credit in bytes
    pub send_buffer: u32,
    /// Offer window scaling with this receive shift
    pub window_scaling: Option<u8>,
    /// Negotiate the timestamp option
    pub timestamps: bool,
    /// Acknowledge in-order data immediately instead of on the delayed-ack
    /// timer
    pub quickack: bool,
    /// With `quickack`, only payloads up to this size force an immediate
    /// acknowledgment; zero means all of them do
    pub quickack_threshold: u32,
    /// Allow a fresh connection request to recycle a TIME_WAIT record
    pub time_wait_reuse: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            mss: 1460,
            window: 0xffff,
            send_buffer: 0xffff,
            window_scaling: None,
            timestamps: false,
            quickack: false,
            quickack_threshold: 0,
            time_wait_reuse: false,
        }
    }
}

/// Connection-level condition bits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Flags(u16);

impl Flags {
    /// An acknowledgment is owed on the delayed-ack timer
    pub const ACK_DELAY: Flags = Flags(1 << 0);
    /// An acknowledgment must go out at the next output poll
    pub const ACK_NOW: Flags = Flags(1 << 1);
    /// In fast recovery
    pub const INFR: Flags = Flags(1 << 2);
    /// The timestamp option was negotiated
    pub const TIMESTAMP: Flags = Flags(1 << 3);
    /// Window scaling was negotiated
    pub const WND_SCALE: Flags = Flags(1 << 4);
    /// The application shut down its receive side
    pub const RXCLOSED: Flags = Flags(1 << 5);

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }
}

/// How the connection came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Initiation {
    Listen,
    Open,
}

/// What the caller should do with the record after a segment was processed.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentArrivesResult {
    /// Keep the record
    Ok,
    /// The close handshake finished; deallocate the record
    CloseConnection,
    /// The peer reset the connection. The error callback has fired;
    /// deallocate the record.
    ConnectionReset,
    /// The connection was aborted, by a callback verdict or by the engine. A
    /// reset may be waiting in the output queue; drain it, then deallocate.
    Aborted,
}

/// What the caller should do with the record after a timer tick.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    Continue,
    /// The record expired; deallocate it
    CloseConnection,
}

enum ProcessOutcome {
    Continue,
    Reset,
    Closed,
    Aborted,
}

/// Scratch state for one arriving segment. The receive processor records
/// what it peeled out of the segment here and the post-processing in
/// [`Tcb::segment_arrives`] delivers it.
pub(crate) struct Inbound {
    pub seg: Segment,
    /// In-order text ready for the application, spliced across segments
    pub recv_data: Option<Message>,
    /// An in-order FIN was processed
    pub got_fin: bool,
}

/// A transmission control block: everything one connection remembers.
///
/// A record is driven entirely from outside: [`segment_arrives`] with each
/// segment the dispatcher routed to it, [`on_tick`] from the slow timer, and
/// [`segments`] to drain whatever it wants transmitted. It never blocks and
/// never calls anything but the [`SocketEvents`] it is handed.
///
/// [`segment_arrives`]: Tcb::segment_arrives
/// [`on_tick`]: Tcb::on_tick
/// [`segments`]: Tcb::segments
#[derive(Debug)]
pub struct Tcb {
    pub id: ConnectionId,
    initiation: Initiation,
    pub(crate) state: State,
    pub(crate) config: TcpConfig,
    pub(crate) flags: Flags,
    pub(crate) snd: SendSequenceSpace,
    pub(crate) rcv: ReceiveSequenceSpace,
    /// Effective send MSS after negotiation
    pub(crate) mss: u32,
    pub(crate) snd_scale: u8,
    pub(crate) rcv_scale: u8,
    pub(crate) ts_recent: u32,
    pub(crate) ts_lastacksent: u32,
    pub(crate) cc: CongestionState,
    algo: Box<dyn Congestion>,
    pub(crate) rtt: RttEstimator,
    /// Ticks since the retransmission timer was armed, or -1 when idle
    pub(crate) rtime: i32,
    pub(crate) nrtx: u8,
    pub(crate) dupacks: u8,
    pub(crate) persist_backoff: u8,
    persist_cnt: u8,
    pub(crate) persist_probes: u32,
    /// Tick of the last peer activity; the TIME_WAIT base
    tmr: u32,
    /// Bytes the current segment newly acknowledged, for the sent event
    pub(crate) acked: u32,
    /// Send buffer credit remaining
    pub(crate) snd_buf: u32,
    /// The sequence number after the last byte handed to [`Tcb::send`]
    pub(crate) snd_lbb: u32,
    /// Total buffer capacity held across the unsent and unacked queues
    pub(crate) snd_queuelen: usize,
    pub(crate) unacked: SegmentQueue,
    pub(crate) unsent: SegmentQueue,
    pub(crate) ooseq: OutOfOrder,
    /// Control segments owed to the wire, resets and empty acknowledgments
    oneshot: Vec<TcpHeader>,
}

/// A fresh initial sequence number.
pub fn generate_iss() -> u32 {
    SmallRng::from_entropy().gen()
}

impl Tcb {
    fn new(id: ConnectionId, initiation: Initiation, state: State, config: TcpConfig) -> Self {
        Self {
            id,
            initiation,
            state,
            flags: Flags::default(),
            snd: SendSequenceSpace {
                wnd: config.window,
                wnd_max: config.window,
                ..Default::default()
            },
            rcv: ReceiveSequenceSpace {
                wnd: config.window,
                wnd_max: config.window,
                ..Default::default()
            },
            mss: config.mss,
            snd_scale: 0,
            rcv_scale: 0,
            ts_recent: 0,
            ts_lastacksent: 0,
            cc: CongestionState::new(1, config.mss.saturating_mul(10)),
            algo: Box::new(Reno),
            rtt: RttEstimator::default(),
            rtime: -1,
            nrtx: 0,
            dupacks: 0,
            persist_backoff: 0,
            persist_cnt: 0,
            persist_probes: 0,
            tmr: 0,
            acked: 0,
            snd_buf: config.send_buffer,
            snd_lbb: 0,
            snd_queuelen: 0,
            unacked: SegmentQueue::default(),
            unsent: SegmentQueue::default(),
            ooseq: OutOfOrder::default(),
            oneshot: Vec::new(),
            config,
        }
    }

    /// Active open: creates the record in SYN_SENT with the SYN queued. Pull
    /// it with [`Tcb::segments`].
    pub fn open(id: ConnectionId, iss: u32, config: TcpConfig) -> Self {
        let mut tcb = Self::new(id, Initiation::Open, State::SynSent, config);
        tcb.snd.iss = iss;
        tcb.snd.una = iss;
        tcb.snd.nxt = iss;
        tcb.snd_lbb = iss.wrapping_add(1);
        if let Ok(header) = tcb
            .header_builder(iss)
            .syn()
            .wnd(tcb.rcv.wnd.min(u16::MAX as u32) as u16)
            .options(options::syn_options(&tcb.config, 0))
            .build()
        {
            tcb.unacked.push(Transmit::new(Segment::new(header, Message::default())));
        }
        tcb
    }

    /// Replaces the congestion controller. Meant to be called right after
    /// open or accept, before any acknowledgment arrives.
    pub fn with_congestion(mut self, algo: Box<dyn Congestion>) -> Self {
        self.algo = algo;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The effective transmit limit, min(send window, congestion window).
    pub fn effective_window(&self) -> u32 {
        self.snd.wnd.min(self.cc.cwnd)
    }

    /// Stops accepting received data. Anything the peer sends after this
    /// aborts the connection.
    pub fn shutdown_receive(&mut self) {
        self.flags.insert(Flags::RXCLOSED);
    }

    fn header_builder(&self, seq: u32) -> TcpHeaderBuilder {
        TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, seq)
    }

    /// The window to advertise, scaled down and clamped to the field width.
    fn advertised_wnd(&self) -> u16 {
        let shift = if self.flags.contains(Flags::WND_SCALE) {
            self.rcv_scale
        } else {
            0
        };
        (self.rcv.wnd >> shift).min(u16::MAX as u32) as u16
    }

    /// Queues application data for transmission, segmentized by the
    /// effective MSS. The last segment of the write carries PSH.
    pub fn send(&mut self, mut message: Message) {
        while !message.is_empty() {
            let take = (self.mss as usize).min(message.len());
            let chunk = message.cut(take);
            let mut builder = self.header_builder(self.snd_lbb).ack(self.rcv.nxt);
            if message.is_empty() {
                builder = builder.psh();
            }
            if let Ok(header) = builder.build() {
                self.snd_lbb = self.snd_lbb.wrapping_add(chunk.len() as u32);
                self.snd_buf = self.snd_buf.saturating_sub(chunk.len() as u32);
                self.snd_queuelen += chunk.capacity();
                self.unsent.push(Transmit::new(Segment::new(header, chunk)));
            }
        }
    }

    /// Finishes the send side: queues a FIN and moves to the appropriate
    /// closing state. A no-op in states that have already sent one.
    pub fn close(&mut self) {
        let next = match self.state {
            State::SynSent => {
                self.state = State::Closed;
                return;
            }
            State::SynReceived | State::Established => State::FinWait1,
            State::CloseWait => State::LastAck,
            _ => return,
        };
        if let Ok(header) = self.header_builder(self.snd_lbb).ack(self.rcv.nxt).fin().build() {
            self.snd_lbb = self.snd_lbb.wrapping_add(1);
            self.unsent.push(Transmit::new(Segment::new(header, Message::default())));
            self.state = next;
        }
    }

    /// Drains everything the connection wants on the wire: queued control
    /// segments, unsent data that fits the effective window, retransmissions,
    /// and any owed acknowledgment.
    pub fn segments(&mut self, now: u32) -> Vec<Segment> {
        let mut out: Vec<Segment> = self
            .oneshot
            .drain(..)
            .map(|header| Segment::new(header, Message::default()))
            .collect();

        // Admit unsent segments into the effective window
        let wnd = self.effective_window();
        while let Some(front) = self.unsent.front() {
            if front.segment.end_seq().wrapping_sub(self.snd.una) > wnd {
                break;
            }
            if let Some(transmit) = self.unsent.pop_front() {
                self.unacked.push(transmit);
            }
        }

        let rcv_nxt = self.rcv.nxt;
        let advert = self.advertised_wnd();
        let unscaled = self.rcv.wnd.min(u16::MAX as u32) as u16;
        let mut max_end = self.snd.nxt;
        let mut measure = None;
        let mut carried_ack = false;

        for transmit in self.unacked.iter_mut() {
            if !transmit.needs_transmit {
                continue;
            }
            transmit.needs_transmit = false;

            let mut seg = transmit.segment.clone();
            if seg.header.ctl.ack() {
                seg.header.ack = rcv_nxt;
                carried_ack = true;
            }
            // The window field of a SYN is never scaled
            seg.header.wnd = if seg.header.ctl.syn() { unscaled } else { advert };
            if mod_le(max_end, seg.end_seq()) {
                max_end = seg.end_seq();
            }
            if measure.is_none() {
                measure = Some(seg.seq());
            }
            out.push(seg);
        }

        self.snd.nxt = max_end;
        // Never time a retransmission (Karn)
        if self.nrtx == 0 {
            if let Some(seq) = measure {
                self.rtt.start(now, seq);
            }
        }
        if !self.unacked.is_empty() && self.rtime < 0 {
            self.rtime = 0;
        }

        if carried_ack {
            self.ts_lastacksent = rcv_nxt;
            self.flags.remove(Flags::ACK_NOW);
            self.flags.remove(Flags::ACK_DELAY);
        } else if self.flags.contains(Flags::ACK_NOW) {
            if let Some(header) = self.empty_ack() {
                out.push(Segment::new(header, Message::default()));
            }
            self.flags.remove(Flags::ACK_NOW);
            self.flags.remove(Flags::ACK_DELAY);
        }

        out
    }

    fn empty_ack(&mut self) -> Option<TcpHeader> {
        self.ts_lastacksent = self.rcv.nxt;
        self.header_builder(self.snd.nxt)
            .ack(self.rcv.nxt)
            .wnd(self.advertised_wnd())
            .build()
            .ok()
    }

    /// Owes an acknowledgment at the next output poll.
    pub(crate) fn ack_now(&mut self) {
        self.flags.insert(Flags::ACK_NOW);
    }

    /// Owes an acknowledgment on the delayed-ack timer; a second deferral
    /// makes it immediate.
    pub(crate) fn ack_delayed(&mut self) {
        if self.flags.contains(Flags::ACK_DELAY) {
            self.flags.insert(Flags::ACK_NOW);
        } else {
            self.flags.insert(Flags::ACK_DELAY);
        }
    }

    /// The application consumed `bytes` of delivered data; the receive
    /// window reopens by that much. If the window was pinched below a
    /// segment, the reopening is announced right away.
    pub fn consumed(&mut self, bytes: u32) {
        let before = self.rcv.wnd;
        self.rcv.wnd = before.saturating_add(bytes).min(self.rcv.wnd_max);
        if before < self.mss && self.rcv.wnd >= self.mss {
            self.ack_now();
        }
    }

    /// Pushes an empty acknowledgment straight into the output queue, for
    /// out-of-window segments that must be answered even if processing goes
    /// no further.
    pub(crate) fn send_empty_ack(&mut self) {
        if let Some(header) = self.empty_ack() {
            self.oneshot.push(header);
        }
    }

    fn push_rst(&mut self, seq: u32, ack: u32) {
        if let Ok(header) = self.header_builder(seq).rst().ack(ack).build() {
            self.oneshot.push(header);
        }
    }

    /// Drops every queue the record holds and stops its timers.
    fn purge(&mut self) {
        self.unsent.clear();
        self.unacked.clear();
        self.ooseq.clear();
        self.snd_queuelen = 0;
        self.rtime = -1;
        self.persist_backoff = 0;
        self.persist_cnt = 0;
        self.rtt.cancel();
    }

    fn enter_time_wait(&mut self, now: u32) {
        debug!(id = %self.id, "Entering TIME_WAIT");
        self.state = State::TimeWait;
        self.tmr = now;
    }

    /// Kills the connection from our side: a reset if the peer would accept
    /// one, the error callback, and a dead record.
    fn abort(&mut self, events: &mut dyn SocketEvents) -> SegmentArrivesResult {
        debug!(id = %self.id, state = %self.state, "Aborting connection");
        if self.state.is_synchronized() {
            self.push_rst(self.snd.nxt, self.rcv.nxt);
        }
        self.purge();
        self.state = State::Closed;
        events.error(SocketError::Aborted);
        SegmentArrivesResult::Aborted
    }

    /// Flags the oldest unacknowledged segment for another transmission.
    pub(crate) fn rexmit_one(&mut self) {
        self.unacked.mark_front();
        self.nrtx = self.nrtx.saturating_add(1);
        self.rtt.cancel();
    }

    /// Fast retransmit on the third duplicate acknowledgment: resend the
    /// oldest segment and enter fast recovery.
    pub(crate) fn rexmit_fast(&mut self) {
        if self.flags.contains(Flags::INFR) || self.unacked.is_empty() {
            return;
        }
        debug!(id = %self.id, dupacks = self.dupacks, "Fast retransmit");
        let flight = self.effective_window();
        self.algo.on_duplicate_ack(&mut self.cc, self.mss, flight);
        self.flags.insert(Flags::INFR);
        self.rexmit_one();
        self.rtime = 0;
    }

    pub(crate) fn congestion_ack(&mut self, kind: super::congestion::AckKind) {
        self.algo.on_ack_received(&mut self.cc, self.mss, kind);
    }

    pub(crate) fn congestion_post_recovery(&mut self) {
        self.algo.on_post_recovery(&mut self.cc);
    }

    /// The slow timer: retransmission timeout, zero-window probing, delayed
    /// acknowledgments, and TIME_WAIT expiry.
    pub fn on_tick(&mut self, now: u32) -> TickResult {
        match self.state {
            State::TimeWait => {
                if now.wrapping_sub(self.tmr) >= 2 * MSL {
                    debug!(id = %self.id, "TIME_WAIT expired");
                    return TickResult::CloseConnection;
                }
                return TickResult::Continue;
            }
            State::Closed => return TickResult::CloseConnection,
            _ => {}
        }

        // A deferred acknowledgment ripens into an immediate one
        if self.flags.contains(Flags::ACK_DELAY) {
            self.flags.remove(Flags::ACK_DELAY);
            self.flags.insert(Flags::ACK_NOW);
        }

        if self.rtime >= 0 && !self.unacked.is_empty() {
            self.rtime += 1;
            if self.rtime >= self.rtt.rto() {
                debug!(id = %self.id, nrtx = self.nrtx, "Retransmission timeout");
                self.nrtx = self.nrtx.saturating_add(1);
                let flight = self.effective_window();
                self.rtt.backoff();
                self.algo.on_retransmission_timeout(&mut self.cc, self.mss, flight);
                self.flags.remove(Flags::INFR);
                self.dupacks = 0;
                self.unacked.mark_all();
                self.rtime = 0;
            }
        }

        if self.persist_backoff > 0 {
            self.persist_cnt = self.persist_cnt.saturating_add(1);
            let interval = PERSIST_INTERVALS[(self.persist_backoff - 1) as usize];
            if self.persist_cnt >= interval {
                trace!(id = %self.id, probes = self.persist_probes + 1, "Zero window probe due");
                self.persist_probes += 1;
                self.persist_cnt = 0;
                if (self.persist_backoff as usize) < PERSIST_INTERVALS.len() {
                    self.persist_backoff += 1;
                }
            }
        }

        TickResult::Continue
    }

    /// Runs one arriving segment through the state machine and delivers the
    /// resulting events.
    pub fn segment_arrives(
        &mut self,
        seg: Segment,
        events: &mut dyn SocketEvents,
        now: u32,
    ) -> SegmentArrivesResult {
        trace!(
            id = %self.id,
            state = %self.state,
            seq = seg.seq(),
            ack = seg.header.ack,
            ctl = ?seg.header.ctl,
            "Segment arrives"
        );

        if self.state == State::TimeWait {
            return self.timewait_input(seg, events, now);
        }

        self.acked = 0;
        let mut inbound = Inbound {
            seg,
            recv_data: None,
            got_fin: false,
        };

        match self.process(&mut inbound, events, now) {
            ProcessOutcome::Continue => {}
            ProcessOutcome::Reset => {
                debug!(id = %self.id, initiation = ?self.initiation, "Connection reset by peer");
                self.state = State::Closed;
                events.error(SocketError::Reset);
                return SegmentArrivesResult::ConnectionReset;
            }
            ProcessOutcome::Closed => {
                self.state = State::Closed;
                return SegmentArrivesResult::CloseConnection;
            }
            ProcessOutcome::Aborted => return SegmentArrivesResult::Aborted,
        }

        // Deliveries happen after all record updates so a callback that
        // aborts leaves nothing half-processed.
        if self.acked > 0 && events.sent(self.acked) == Verdict::Abort {
            return self.abort(events);
        }

        if let Some(data) = inbound.recv_data.take() {
            if self.flags.contains(Flags::RXCLOSED) {
                // Data past a receive shutdown kills the connection
                return self.abort(events);
            }
            let len = data.len() as u32;
            match events.received(data, inbound.seg.header.ctl.psh()) {
                Delivery::Consumed => {}
                Delivery::Refused => {
                    // Reopen the window; the peer will retransmit
                    self.rcv.wnd = (self.rcv.wnd + len).min(self.rcv.wnd_max);
                }
                Delivery::Abort => return self.abort(events),
            }
        }

        if inbound.got_fin {
            if self.rcv.wnd != self.rcv.wnd_max {
                // The FIN occupied a window slot no data will ever fill
                self.rcv.wnd += 1;
            }
            if events.remote_closed() == Verdict::Abort {
                return self.abort(events);
            }
        }

        SegmentArrivesResult::Ok
    }

    fn process(
        &mut self,
        inbound: &mut Inbound,
        events: &mut dyn SocketEvents,
        now: u32,
    ) -> ProcessOutcome {
        let ctl = inbound.seg.header.ctl;
        let seqno = inbound.seg.seq();
        let ackno = inbound.seg.header.ack;

        if ctl.rst() {
            let acceptable = match self.state {
                State::SynSent => ctl.ack() && ackno == self.snd.nxt,
                _ => mod_bounded(
                    self.rcv.nxt,
                    Leq,
                    seqno,
                    Leq,
                    self.rcv.nxt.wrapping_add(self.rcv.wnd),
                ),
            };
            if acceptable {
                self.flags.remove(Flags::ACK_DELAY);
                self.purge();
                return ProcessOutcome::Reset;
            }
            trace!(id = %self.id, seqno, "Dropping out-of-window reset");
            return ProcessOutcome::Continue;
        }

        if ctl.syn() && self.state.is_synchronized() {
            // A stale connection request; tell the peer where we are
            self.ack_now();
            return ProcessOutcome::Continue;
        }

        if !self.flags.contains(Flags::RXCLOSED) {
            self.tmr = now;
        }

        options::negotiate(self, &inbound.seg.header, inbound.seg.seg_len());

        match self.state {
            State::SynSent => self.process_syn_sent(inbound, events, now),
            State::SynReceived => self.process_syn_received(inbound, events, now),
            State::Established | State::CloseWait => {
                self.receive(inbound, now);
                if inbound.got_fin && self.state == State::Established {
                    self.ack_now();
                    self.state = State::CloseWait;
                }
                ProcessOutcome::Continue
            }
            State::FinWait1 => {
                self.receive(inbound, now);
                if inbound.got_fin {
                    if ctl.ack() && ackno == self.snd.nxt && self.unsent.is_empty() {
                        // Our FIN is acknowledged too: straight to TIME_WAIT
                        self.ack_now();
                        self.purge();
                        self.enter_time_wait(now);
                    } else {
                        self.ack_now();
                        self.state = State::Closing;
                    }
                } else if ctl.ack() && ackno == self.snd.nxt && self.unsent.is_empty() {
                    self.state = State::FinWait2;
                }
                ProcessOutcome::Continue
            }
            State::FinWait2 => {
                self.receive(inbound, now);
                if inbound.got_fin {
                    self.ack_now();
                    self.purge();
                    self.enter_time_wait(now);
                }
                ProcessOutcome::Continue
            }
            State::Closing => {
                self.receive(inbound, now);
                if ctl.ack() && ackno == self.snd.nxt {
                    self.purge();
                    self.enter_time_wait(now);
                }
                ProcessOutcome::Continue
            }
            State::LastAck => {
                self.receive(inbound, now);
                if ctl.ack() && ackno == self.snd.nxt {
                    // Deallocation is the caller's, after this returns
                    debug!(id = %self.id, "Last acknowledgment received");
                    self.purge();
                    return ProcessOutcome::Closed;
                }
                ProcessOutcome::Continue
            }
            State::TimeWait | State::Closed => ProcessOutcome::Continue,
        }
    }

    fn process_syn_sent(
        &mut self,
        inbound: &mut Inbound,
        events: &mut dyn SocketEvents,
        _now: u32,
    ) -> ProcessOutcome {
        let ctl = inbound.seg.header.ctl;
        let seqno = inbound.seg.seq();
        let ackno = inbound.seg.header.ack;

        let expected = self
            .unacked
            .front()
            .map(|t| t.segment.seq().wrapping_add(1));

        if ctl.ack() && ctl.syn() && Some(ackno) == expected {
            self.rcv.irs = seqno;
            self.rcv.nxt = seqno.wrapping_add(1);
            self.snd.una = ackno;
            let scaled = (inbound.seg.header.wnd as u32) << self.snd_scale;
            self.snd.wnd = scaled;
            self.snd.wnd_max = scaled;
            // Forces the first window update through
            self.snd.wl1 = seqno.wrapping_sub(1);
            self.snd.wl2 = ackno;
            self.state = State::Established;
            debug!(id = %self.id, mss = self.mss, "Active open complete");

            self.cc.ssthresh = self.mss.saturating_mul(10);
            self.algo.on_connection_init(&mut self.cc, self.mss);

            // The SYN is accounted for; release it
            if let Some(transmit) = self.unacked.pop_front() {
                self.snd_queuelen -= transmit.segment.capacity();
            }
            if self.unacked.is_empty() {
                self.rtime = -1;
            } else {
                self.rtime = 0;
            }
            self.nrtx = 0;

            if events.connected() == Verdict::Abort {
                self.abort(events);
                return ProcessOutcome::Aborted;
            }
            self.ack_now();
        } else if ctl.ack() {
            // Half open: an acknowledgment of nothing we sent draws a reset
            self.push_rst(ackno, seqno.wrapping_add(inbound.seg.seg_len()));
        }
        ProcessOutcome::Continue
    }

    fn process_syn_received(
        &mut self,
        inbound: &mut Inbound,
        events: &mut dyn SocketEvents,
        now: u32,
    ) -> ProcessOutcome {
        let ctl = inbound.seg.header.ctl;
        let seqno = inbound.seg.seq();
        let ackno = inbound.seg.header.ack;

        if ctl.ack() {
            if mod_bounded(self.snd.una, Le, ackno, Leq, self.snd.nxt) {
                self.state = State::Established;
                debug!(id = %self.id, mss = self.mss, "Passive open complete");
                if events.accepted() == Verdict::Abort {
                    self.abort(events);
                    return ProcessOutcome::Aborted;
                }

                let old_cwnd = self.cc.cwnd;
                self.receive(inbound, now);
                if self.acked > 0 {
                    // The SYN slot is not application data
                    self.acked -= 1;
                }
                self.cc.cwnd = old_cwnd;
                self.algo.on_connection_init(&mut self.cc, self.mss);

                if inbound.got_fin {
                    self.ack_now();
                    self.state = State::CloseWait;
                }
            } else {
                self.push_rst(ackno, seqno.wrapping_add(inbound.seg.seg_len()));
            }
        } else if ctl.syn() && seqno == self.rcv.nxt.wrapping_sub(1) {
            // The peer retransmitted its SYN; ours must have been lost
            self.rexmit_one();
        }
        ProcessOutcome::Continue
    }

    /// TIME_WAIT processing: mostly inert, but a well-placed fresh connection
    /// request may recycle the record (RFC 6191).
    fn timewait_input(
        &mut self,
        seg: Segment,
        events: &mut dyn SocketEvents,
        now: u32,
    ) -> SegmentArrivesResult {
        let ctl = seg.header.ctl;

        if ctl.rst() {
            return SegmentArrivesResult::Ok;
        }

        if ctl.syn() && !ctl.ack() {
            let tsval = options::timestamp_value(&seg.header.options);
            let seq_ok = mod_geq(seg.seq(), self.rcv.nxt);
            let reusable = match tsval {
                Some(tsval) if self.flags.contains(Flags::TIMESTAMP) => {
                    self.ts_recent < tsval || (self.ts_recent == tsval && seq_ok)
                }
                _ => seq_ok,
            };
            if self.config.time_wait_reuse && reusable {
                return self.reuse(seg, events, now);
            }
            trace!(id = %self.id, seq = seg.seq(), "Dropping connection request in TIME_WAIT");
            return SegmentArrivesResult::Ok;
        }

        if ctl.fin() {
            // The peer retransmitted its FIN; hold the record another round
            self.tmr = now;
        }

        if seg.seg_len() > 0 {
            if ctl.syn() && ctl.ack() {
                self.push_rst(seg.header.ack, seg.seq().wrapping_add(seg.seg_len()));
            } else {
                self.ack_now();
            }
        }
        SegmentArrivesResult::Ok
    }

    /// Recycles this record into a fresh passive open for the arriving
    /// connection request.
    fn reuse(
        &mut self,
        seg: Segment,
        events: &mut dyn SocketEvents,
        now: u32,
    ) -> SegmentArrivesResult {
        debug!(id = %self.id, "Recycling TIME_WAIT record for a new connection");

        let iss = self.snd.nxt;
        self.purge();
        self.oneshot.clear();
        self.flags = Flags::default();
        self.initiation = Initiation::Listen;
        self.mss = self.config.mss;
        self.snd_scale = 0;
        self.rcv_scale = 0;
        self.ts_recent = 0;
        self.ts_lastacksent = 0;
        self.cc = CongestionState::new(1, self.config.mss.saturating_mul(10));
        self.rtt = RttEstimator::default();
        self.nrtx = 0;
        self.dupacks = 0;
        self.acked = 0;
        self.snd_buf = self.config.send_buffer;
        self.snd_queuelen = 0;
        self.snd = SendSequenceSpace {
            iss,
            una: iss,
            nxt: iss,
            ..Default::default()
        };
        self.rcv = ReceiveSequenceSpace {
            wnd: self.config.window,
            wnd_max: self.config.window,
            ..Default::default()
        };

        self.synchronize_passive(&seg, now);

        if events.reused() == Verdict::Abort {
            return self.abort(events);
        }
        SegmentArrivesResult::Ok
    }

    /// Takes an arriving connection request and answers it: negotiate
    /// options, adopt the peer's spaces, queue the SYN+ACK.
    fn synchronize_passive(&mut self, seg: &Segment, now: u32) {
        options::negotiate(self, &seg.header, seg.seg_len());

        self.rcv.irs = seg.seq();
        self.rcv.nxt = seg.seq().wrapping_add(1);
        let scaled = (seg.header.wnd as u32) << self.snd_scale;
        self.snd.wnd = scaled;
        self.snd.wnd_max = scaled;
        self.snd.wl1 = seg.seq().wrapping_sub(1);
        self.snd.wl2 = self.snd.iss;
        self.cc.ssthresh = scaled;
        self.snd_lbb = self.snd.iss.wrapping_add(1);
        self.state = State::SynReceived;
        self.tmr = now;

        if let Ok(header) = self
            .header_builder(self.snd.iss)
            .syn()
            .ack(self.rcv.nxt)
            .wnd(self.rcv.wnd.min(u16::MAX as u32) as u16)
            .options(options::synack_options(self, now))
            .build()
        {
            self.unacked.push(Transmit::new(Segment::new(header, Message::default())));
        }
    }
}

/// Handles a segment with no matching connection: everything but a reset
/// draws a reset framed around the arriving segment's numbers.
pub fn segment_arrives_closed(seg: &Segment) -> Option<TcpHeader> {
    if seg.header.ctl.rst() {
        return None;
    }
    let seq = if seg.header.ctl.ack() {
        seg.header.ack
    } else {
        0
    };
    TcpHeaderBuilder::new(seg.header.dst_port, seg.header.src_port, seq)
        .rst()
        .ack(seg.seq().wrapping_add(seg.seg_len()))
        .build()
        .ok()
}

/// Handles a segment arriving for a listening endpoint.
pub fn segment_arrives_listen(
    seg: Segment,
    local: Address,
    remote: Address,
    iss: u32,
    config: TcpConfig,
    now: u32,
) -> Option<ListenResult> {
    if seg.header.ctl.rst() {
        // Could not be valid, ignore
        return None;
    }

    if seg.header.ctl.ack() {
        // An acknowledgment in LISTEN is for nothing; reset it
        let header = TcpHeaderBuilder::new(seg.header.dst_port, seg.header.src_port, seg.header.ack)
            .rst()
            .build()
            .ok()?;
        return Some(ListenResult::Response(header));
    }

    if seg.header.ctl.syn() {
        let id = ConnectionId::new(
            Endpoint::new(local, seg.header.dst_port),
            Endpoint::new(remote, seg.header.src_port),
        );
        debug!(%id, "Connection request");
        let mut tcb = Tcb::new(id, Initiation::Listen, State::SynReceived, config);
        tcb.snd.iss = iss;
        tcb.snd.una = iss;
        tcb.snd.nxt = iss;
        tcb.synchronize_passive(&seg, now);
        Some(ListenResult::Tcb(tcb))
    } else {
        // Any other control or data-bearing segment is discarded
        None
    }
}

/// What a listening endpoint produced for an arriving segment.
pub enum ListenResult {
    /// A response segment to transmit, with no new connection
    Response(TcpHeader),
    /// A new connection record in SYN_RECEIVED with its SYN+ACK queued
    Tcb(Tcb),
}

impl ListenResult {
    pub fn response(self) -> Option<TcpHeader> {
        match self {
            ListenResult::Response(response) => Some(response),
            ListenResult::Tcb(_) => None,
        }
    }

    pub fn tcb(self) -> Option<Tcb> {
        match self {
            ListenResult::Response(_) => None,
            ListenResult::Tcb(tcb) => Some(tcb),
        }
    }
}
