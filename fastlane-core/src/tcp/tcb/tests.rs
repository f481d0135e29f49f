use super::*;
use crate::tcp::{
    events::NoEvents,
    options::{OPT_MSS, OPT_NOP, OPT_WS, OPT_WS_LEN},
    seq::mod_leq,
};

const CLIENT_ISS: u32 = 100;
const SERVER_ISS: u32 = 5000;
const CLIENT_PORT: u16 = 4530;
const SERVER_PORT: u16 = 80;

#[derive(Default)]
struct Recorder {
    connected: u32,
    accepted: u32,
    reused: u32,
    remote_closed: u32,
    sent: u32,
    received: Vec<u8>,
    pushes: u32,
    errors: Vec<SocketError>,
}

impl SocketEvents for Recorder {
    fn connected(&mut self) -> Verdict {
        self.connected += 1;
        Verdict::Continue
    }

    fn accepted(&mut self) -> Verdict {
        self.accepted += 1;
        Verdict::Continue
    }

    fn received(&mut self, data: Message, push: bool) -> Delivery {
        self.received.extend(data.iter());
        if push {
            self.pushes += 1;
        }
        Delivery::Consumed
    }

    fn sent(&mut self, bytes: u32) -> Verdict {
        self.sent += bytes;
        Verdict::Continue
    }

    fn remote_closed(&mut self) -> Verdict {
        self.remote_closed += 1;
        Verdict::Continue
    }

    fn reused(&mut self) -> Verdict {
        self.reused += 1;
        Verdict::Continue
    }

    fn error(&mut self, reason: SocketError) {
        self.errors.push(reason);
    }
}

fn client_id() -> ConnectionId {
    ConnectionId::new(
        Endpoint::v4([10, 0, 0, 1], CLIENT_PORT),
        Endpoint::v4([10, 0, 0, 2], SERVER_PORT),
    )
}

/// A segment as the remote peer would send it to the server side.
fn from_client(seq: u32, ack: u32, payload: &[u8]) -> Segment {
    let header = TcpHeaderBuilder::new(CLIENT_PORT, SERVER_PORT, seq)
        .ack(ack)
        .wnd(0xffff)
        .build()
        .unwrap();
    Segment::new(header, Message::new(payload.to_vec()))
}

/// A segment as the remote peer would send it to the client side.
fn from_server(seq: u32, ack: u32, payload: &[u8]) -> Segment {
    let header = TcpHeaderBuilder::new(SERVER_PORT, CLIENT_PORT, seq)
        .ack(ack)
        .wnd(0xffff)
        .build()
        .unwrap();
    Segment::new(header, Message::new(payload.to_vec()))
}

/// Drives a full three-way handshake and returns both ends established.
fn handshake(config: TcpConfig) -> (Tcb, Tcb, Recorder, Recorder) {
    let mut client = Tcb::open(client_id(), CLIENT_ISS, config.clone());
    let mut client_events = Recorder::default();
    let mut server_events = Recorder::default();

    let mut sent = client.segments(0);
    assert_eq!(sent.len(), 1);
    let syn = sent.remove(0);
    assert!(syn.header.ctl.syn());
    assert!(!syn.header.ctl.ack());

    let mut server = segment_arrives_listen(
        syn,
        [10, 0, 0, 2].into(),
        [10, 0, 0, 1].into(),
        SERVER_ISS,
        config,
        0,
    )
    .unwrap()
    .tcb()
    .unwrap();
    assert_eq!(server.state(), State::SynReceived);
    assert_eq!(server.id, client_id().reverse());

    let mut sent = server.segments(0);
    assert_eq!(sent.len(), 1);
    let synack = sent.remove(0);
    assert!(synack.header.ctl.syn());
    assert!(synack.header.ctl.ack());
    assert_eq!(synack.header.ack, CLIENT_ISS + 1);

    let result = client.segment_arrives(synack, &mut client_events, 0);
    assert_eq!(result, SegmentArrivesResult::Ok);
    assert_eq!(client.state(), State::Established);
    assert_eq!(client_events.connected, 1);

    let mut sent = client.segments(0);
    assert_eq!(sent.len(), 1);
    let ack = sent.remove(0);
    assert!(ack.header.ctl.ack());
    assert!(!ack.header.ctl.syn());

    let result = server.segment_arrives(ack, &mut server_events, 0);
    assert_eq!(result, SegmentArrivesResult::Ok);
    assert_eq!(server.state(), State::Established);
    assert_eq!(server_events.accepted, 1);

    (client, server, client_events, server_events)
}

fn deliver(from: &mut Tcb, to: &mut Tcb, events: &mut Recorder, now: u32) {
    for seg in from.segments(now) {
        let _ = to.segment_arrives(seg, events, now);
    }
}

/// The accounting every mutation is supposed to preserve.
fn check_invariants(tcb: &Tcb) {
    assert!(mod_leq(tcb.snd.una, tcb.snd.nxt));
    assert!(tcb.ooseq.is_sorted_nonoverlapping());
    assert_eq!(
        tcb.unsent.capacity() + tcb.unacked.capacity(),
        tcb.snd_queuelen
    );
}

#[test]
fn three_way_handshake() {
    let (client, server, _, _) = handshake(TcpConfig::default());
    assert_eq!(client.snd.una, CLIENT_ISS + 1);
    assert_eq!(client.snd.nxt, CLIENT_ISS + 1);
    assert_eq!(client.rcv.nxt, SERVER_ISS + 1);
    assert_eq!(server.snd.una, SERVER_ISS + 1);
    assert_eq!(server.rcv.nxt, CLIENT_ISS + 1);
    assert_eq!(server.mss, 1460);
    check_invariants(&client);
    check_invariants(&server);
}

#[test]
fn ghost_acknowledgments_draw_resets() {
    let mut client = Tcb::open(client_id(), CLIENT_ISS, TcpConfig::default());
    let _ = client.segments(0);
    let mut events = Recorder::default();

    // An old duplicate SYN+ACK acknowledges the wrong sequence number
    let ghost = Segment::new(
        TcpHeaderBuilder::new(SERVER_PORT, CLIENT_PORT, 900)
            .syn()
            .ack(91)
            .wnd(1000)
            .build()
            .unwrap(),
        Message::default(),
    );
    let result = client.segment_arrives(ghost, &mut events, 1);
    assert_eq!(result, SegmentArrivesResult::Ok);
    assert_eq!(client.state(), State::SynSent);

    let out = client.segments(1);
    assert_eq!(out.len(), 1);
    assert!(out[0].header.ctl.rst());
    assert_eq!(out[0].seq(), 91);
    // Referencing the ghost's own numbers
    assert_eq!(out[0].header.ack, 901);

    // A bare acknowledgment of nothing gets the same treatment
    let bare = from_server(901, 77, b"");
    let result = client.segment_arrives(bare, &mut events, 2);
    assert_eq!(result, SegmentArrivesResult::Ok);
    let out = client.segments(2);
    assert_eq!(out.len(), 1);
    assert!(out[0].header.ctl.rst());
    assert_eq!(out[0].seq(), 77);
    assert!(events.errors.is_empty());
}

#[test]
fn listen_answers_stray_segments() {
    // A RST never reaches a listener
    let rst = Segment::new(
        TcpHeaderBuilder::new(CLIENT_PORT, SERVER_PORT, 700)
            .rst()
            .build()
            .unwrap(),
        Message::default(),
    );
    assert!(segment_arrives_listen(
        rst,
        [10, 0, 0, 2].into(),
        [10, 0, 0, 1].into(),
        SERVER_ISS,
        TcpConfig::default(),
        0,
    )
    .is_none());

    // An acknowledgment is for nothing we ever sent
    let ack = from_client(700, 3000, b"");
    let reset = segment_arrives_listen(
        ack,
        [10, 0, 0, 2].into(),
        [10, 0, 0, 1].into(),
        SERVER_ISS,
        TcpConfig::default(),
        0,
    )
    .unwrap()
    .response()
    .unwrap();
    assert!(reset.ctl.rst());
    assert_eq!(reset.seq, 3000);
    assert_eq!(reset.src_port, SERVER_PORT);
    assert_eq!(reset.dst_port, CLIENT_PORT);
}

#[test]
fn orderly_close() {
    let (mut client, mut server, mut client_events, mut server_events) =
        handshake(TcpConfig::default());

    client.close();
    assert_eq!(client.state(), State::FinWait1);
    deliver(&mut client, &mut server, &mut server_events, 1);
    assert_eq!(server.state(), State::CloseWait);
    assert_eq!(server_events.remote_closed, 1);

    deliver(&mut server, &mut client, &mut client_events, 1);
    assert_eq!(client.state(), State::FinWait2);

    server.close();
    assert_eq!(server.state(), State::LastAck);
    deliver(&mut server, &mut client, &mut client_events, 2);
    assert_eq!(client.state(), State::TimeWait);
    assert_eq!(client_events.remote_closed, 1);

    let last_ack = client.segments(2).remove(0);
    let result = server.segment_arrives(last_ack, &mut server_events, 2);
    assert_eq!(result, SegmentArrivesResult::CloseConnection);

    // The record lingers for two segment lifetimes
    assert_eq!(client.on_tick(2 + 2 * MSL - 1), TickResult::Continue);
    assert_eq!(client.state(), State::TimeWait);
    assert_eq!(client.on_tick(2 + 2 * MSL), TickResult::CloseConnection);
}

#[test]
fn simultaneous_close() {
    let (mut client, mut server, mut client_events, mut server_events) =
        handshake(TcpConfig::default());

    client.close();
    server.close();
    let client_fin = client.segments(1).remove(0);
    let server_fin = server.segments(1).remove(0);
    assert!(client_fin.header.ctl.fin());
    assert!(server_fin.header.ctl.fin());

    let _ = client.segment_arrives(server_fin, &mut client_events, 1);
    let _ = server.segment_arrives(client_fin, &mut server_events, 1);
    assert_eq!(client.state(), State::Closing);
    assert_eq!(server.state(), State::Closing);
    assert_eq!(client_events.remote_closed, 1);
    assert_eq!(server_events.remote_closed, 1);

    let client_ack = client.segments(1).remove(0);
    let server_ack = server.segments(1).remove(0);
    let _ = client.segment_arrives(server_ack, &mut client_events, 1);
    let _ = server.segment_arrives(client_ack, &mut server_events, 1);
    assert_eq!(client.state(), State::TimeWait);
    assert_eq!(server.state(), State::TimeWait);
}

#[test]
fn data_transfer_and_segmentation() {
    let config = TcpConfig {
        mss: 400,
        ..TcpConfig::default()
    };
    let (mut client, mut server, mut client_events, mut server_events) = handshake(config);

    client.send(Message::new(vec![7u8; 1000]));
    check_invariants(&client);

    // The congestion window admits two segments on a fresh connection
    let segs = client.segments(1);
    assert_eq!(segs.len(), 2);
    assert_eq!(segs[0].seq(), CLIENT_ISS + 1);
    assert_eq!(segs[0].payload.len(), 400);
    assert!(!segs[0].header.ctl.psh());
    assert_eq!(segs[1].seq(), CLIENT_ISS + 401);

    for seg in segs {
        let _ = server.segment_arrives(seg, &mut server_events, 1);
    }
    assert_eq!(server_events.received.len(), 800);
    assert_eq!(server.rcv.nxt, CLIENT_ISS + 801);

    // The second in-order segment forced the delayed acknowledgment out
    let acks = server.segments(1);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].header.ack, CLIENT_ISS + 801);

    let _ = client.segment_arrives(acks.into_iter().next().unwrap(), &mut client_events, 2);
    assert_eq!(client_events.sent, 800);
    check_invariants(&client);

    // The acknowledgment opened the window for the rest
    let segs = client.segments(2);
    assert_eq!(segs.len(), 1);
    assert_eq!(segs[0].payload.len(), 200);
    assert!(segs[0].header.ctl.psh());
    for seg in segs {
        let _ = server.segment_arrives(seg, &mut server_events, 2);
    }
    assert_eq!(server_events.received, vec![7u8; 1000]);
    assert_eq!(server_events.pushes, 1);
}

#[test]
fn out_of_order_reassembly() {
    let (_, mut server, _, mut server_events) = handshake(TcpConfig::default());
    let base = server.rcv.nxt;
    let peer_nxt = SERVER_ISS + 1;

    // The third and second blocks arrive before the first
    let _ = server.segment_arrives(
        from_client(base + 1000, peer_nxt, &[3u8; 500]),
        &mut server_events,
        1,
    );
    assert!(server_events.received.is_empty());
    assert_eq!(server.ooseq.len(), 1);

    // The gap is acknowledged immediately
    let acks = server.segments(1);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].header.ack, base);

    let _ = server.segment_arrives(
        from_client(base + 500, peer_nxt, &[2u8; 500]),
        &mut server_events,
        1,
    );
    assert_eq!(server.ooseq.len(), 2);
    assert!(server.ooseq.is_sorted_nonoverlapping());
    let _ = server.segments(1);

    // The first block splices everything held
    let _ = server.segment_arrives(
        from_client(base, peer_nxt, &[1u8; 500]),
        &mut server_events,
        1,
    );
    assert!(server.ooseq.is_empty());
    assert_eq!(server.rcv.nxt, base + 1500);

    let mut expected = vec![1u8; 500];
    expected.extend_from_slice(&[2u8; 500]);
    expected.extend_from_slice(&[3u8; 500]);
    assert_eq!(server_events.received, expected);

    let acks = server.segments(1);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].header.ack, base + 1500);
}

#[test]
fn fast_retransmit_on_third_duplicate() {
    let config = TcpConfig {
        mss: 100,
        ..TcpConfig::default()
    };
    let (mut client, _, mut client_events, _) = handshake(config);
    client.cc.cwnd = 1_000_000;

    client.send(Message::new(vec![0u8; 300]));
    let segs = client.segments(1);
    assert_eq!(segs.len(), 3);

    // The first segment gets through
    let _ = client.segment_arrives(
        from_server(SERVER_ISS + 1, CLIENT_ISS + 101, b""),
        &mut client_events,
        2,
    );
    assert_eq!(client_events.sent, 100);

    // Two duplicates are not yet enough
    for _ in 0..2 {
        let _ = client.segment_arrives(
            from_server(SERVER_ISS + 1, CLIENT_ISS + 101, b""),
            &mut client_events,
            3,
        );
        assert!(client.segments(3).is_empty());
    }
    assert_eq!(client.dupacks, 2);

    // The third triggers fast retransmit of the oldest segment only
    let _ = client.segment_arrives(
        from_server(SERVER_ISS + 1, CLIENT_ISS + 101, b""),
        &mut client_events,
        4,
    );
    assert!(client.flags.contains(Flags::INFR));
    let out = client.segments(4);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].seq(), CLIENT_ISS + 101);
    assert_eq!(out[0].payload.len(), 100);

    // A new acknowledgment ends recovery
    let _ = client.segment_arrives(
        from_server(SERVER_ISS + 1, CLIENT_ISS + 301, b""),
        &mut client_events,
        5,
    );
    assert!(!client.flags.contains(Flags::INFR));
    assert_eq!(client.dupacks, 0);
    check_invariants(&client);
}

#[test]
fn partial_acknowledgment_shrinks_in_place() {
    let config = TcpConfig {
        mss: 300,
        ..TcpConfig::default()
    };
    let (mut client, _, mut client_events, _) = handshake(config);

    // One segment built from three datapath buffers
    let mut message = Message::new([1u8; 100]);
    message.push([2u8; 100]);
    message.push([3u8; 100]);
    client.send(message);
    let segs = client.segments(1);
    assert_eq!(segs.len(), 1);
    assert_eq!(segs[0].payload.chunk_count(), 3);

    // Half of it comes back acknowledged
    let _ = client.segment_arrives(
        from_server(SERVER_ISS + 1, CLIENT_ISS + 151, b""),
        &mut client_events,
        2,
    );
    assert_eq!(client_events.sent, 150);
    assert_eq!(client.snd.una, CLIENT_ISS + 151);

    let front = &client.unacked.front().unwrap().segment;
    assert_eq!(front.seq(), CLIENT_ISS + 151);
    assert_eq!(front.payload.len(), 150);
    // The first buffer was released whole; the second shrank in place
    assert_eq!(front.payload.chunk_count(), 2);
    assert_eq!(client.snd_queuelen, 200);
    check_invariants(&client);
}

#[test]
fn window_scaling_negotiated_on_accept() {
    let config = TcpConfig {
        window_scaling: Some(7),
        window: 500_000,
        ..TcpConfig::default()
    };
    let syn = Segment::new(
        TcpHeaderBuilder::new(CLIENT_PORT, SERVER_PORT, 1000)
            .syn()
            .wnd(1000)
            .options(vec![OPT_MSS, 4, 0x05, 0xb4, OPT_WS, 3, 5, OPT_NOP])
            .build()
            .unwrap(),
        Message::default(),
    );
    let mut server = segment_arrives_listen(
        syn,
        [10, 0, 0, 2].into(),
        [10, 0, 0, 1].into(),
        SERVER_ISS,
        config,
        0,
    )
    .unwrap()
    .tcb()
    .unwrap();

    assert!(server.flags.contains(Flags::WND_SCALE));
    assert_eq!(server.snd_scale, 5);
    assert_eq!(server.rcv_scale, 7);
    // The peer's window applies scaled from the start
    assert_eq!(server.snd.wnd, 1000 << 5);

    let synack = server.segments(0).remove(0);
    // The window field of a SYN is never scaled
    assert_eq!(synack.header.wnd, 0xffff);
    assert!(synack
        .header
        .options
        .windows(3)
        .any(|w| w == [OPT_WS, OPT_WS_LEN as u8, 7]));
}

#[test]
fn time_wait_reuse() {
    fn time_wait_server(tsval: u32) -> Tcb {
        let config = TcpConfig {
            timestamps: true,
            time_wait_reuse: true,
            ..TcpConfig::default()
        };
        let syn = Segment::new(
            TcpHeaderBuilder::new(CLIENT_PORT, SERVER_PORT, 1000)
                .syn()
                .wnd(0xffff)
                .options(options::timestamp_option(tsval, 0))
                .build()
                .unwrap(),
            Message::default(),
        );
        let mut server = segment_arrives_listen(
            syn,
            [10, 0, 0, 2].into(),
            [10, 0, 0, 1].into(),
            SERVER_ISS,
            config,
            0,
        )
        .unwrap()
        .tcb()
        .unwrap();
        assert!(server.flags.contains(Flags::TIMESTAMP));
        assert_eq!(server.ts_recent, tsval);

        let _ = server.segments(0);
        let _ = server.segment_arrives(from_client(1001, SERVER_ISS + 1, b""), &mut NoEvents, 0);
        assert_eq!(server.state(), State::Established);

        // The server closes first and its FIN is answered with the peer's own
        server.close();
        let _ = server.segments(0);
        let fin = Segment::new(
            TcpHeaderBuilder::new(CLIENT_PORT, SERVER_PORT, 1001)
                .ack(SERVER_ISS + 2)
                .fin()
                .wnd(0xffff)
                .build()
                .unwrap(),
            Message::default(),
        );
        let _ = server.segment_arrives(fin, &mut NoEvents, 1);
        assert_eq!(server.state(), State::TimeWait);
        server
    }

    let mut server = time_wait_server(500);
    let mut events = Recorder::default();

    // An old connection request is silently dropped
    let stale = Segment::new(
        TcpHeaderBuilder::new(CLIENT_PORT, SERVER_PORT, 90)
            .syn()
            .wnd(0xffff)
            .options(options::timestamp_option(400, 0))
            .build()
            .unwrap(),
        Message::default(),
    );
    let result = server.segment_arrives(stale, &mut events, 10);
    assert_eq!(result, SegmentArrivesResult::Ok);
    assert_eq!(server.state(), State::TimeWait);
    assert_eq!(events.reused, 0);

    // A fresh one recycles the record into a new passive open
    let fresh = Segment::new(
        TcpHeaderBuilder::new(CLIENT_PORT, SERVER_PORT, 9000)
            .syn()
            .wnd(0xffff)
            .options(options::timestamp_option(600, 0))
            .build()
            .unwrap(),
        Message::default(),
    );
    let result = server.segment_arrives(fresh, &mut events, 10);
    assert_eq!(result, SegmentArrivesResult::Ok);
    assert_eq!(server.state(), State::SynReceived);
    assert_eq!(events.reused, 1);
    assert_eq!(server.ts_recent, 600);

    let synack = server.segments(10).remove(0);
    assert!(synack.header.ctl.syn());
    assert_eq!(synack.header.ack, 9001);
    // The new initial sequence number continues the old send space
    assert_eq!(synack.seq(), SERVER_ISS + 2);
}

#[test]
fn stale_syn_draws_challenge_ack() {
    let (mut client, _, mut client_events, _) = handshake(TcpConfig::default());

    let ghost = Segment::new(
        TcpHeaderBuilder::new(SERVER_PORT, CLIENT_PORT, 777_777)
            .syn()
            .wnd(0xffff)
            .build()
            .unwrap(),
        Message::default(),
    );
    let result = client.segment_arrives(ghost, &mut client_events, 1);
    assert_eq!(result, SegmentArrivesResult::Ok);
    assert_eq!(client.state(), State::Established);

    let out = client.segments(1);
    assert_eq!(out.len(), 1);
    assert!(!out[0].header.ctl.rst());
    assert_eq!(out[0].header.ack, SERVER_ISS + 1);
}

#[test]
fn reset_terminates_the_connection() {
    let (mut client, _, mut client_events, _) = handshake(TcpConfig::default());

    // Out of window: ignored
    let stray = Segment::new(
        TcpHeaderBuilder::new(SERVER_PORT, CLIENT_PORT, client.rcv.nxt.wrapping_sub(1))
            .rst()
            .build()
            .unwrap(),
        Message::default(),
    );
    let result = client.segment_arrives(stray, &mut client_events, 1);
    assert_eq!(result, SegmentArrivesResult::Ok);
    assert_eq!(client.state(), State::Established);

    // In window: the connection dies and the application hears about it
    let rst = Segment::new(
        TcpHeaderBuilder::new(SERVER_PORT, CLIENT_PORT, client.rcv.nxt)
            .rst()
            .build()
            .unwrap(),
        Message::default(),
    );
    let result = client.segment_arrives(rst, &mut client_events, 1);
    assert_eq!(result, SegmentArrivesResult::ConnectionReset);
    assert_eq!(client.state(), State::Closed);
    assert_eq!(client_events.errors, vec![SocketError::Reset]);
    assert!(client.unacked.is_empty());
}

#[test]
fn receive_shutdown_aborts_on_data() {
    let (_, mut server, _, mut server_events) = handshake(TcpConfig::default());
    let base = server.rcv.nxt;

    server.shutdown_receive();
    let result = server.segment_arrives(
        from_client(base, SERVER_ISS + 1, b"too late"),
        &mut server_events,
        1,
    );
    assert_eq!(result, SegmentArrivesResult::Aborted);
    assert_eq!(server.state(), State::Closed);
    assert_eq!(server_events.errors, vec![SocketError::Aborted]);
    assert!(server_events.received.is_empty());

    // The abort owes the peer a reset
    let out = server.segments(1);
    assert_eq!(out.len(), 1);
    assert!(out[0].header.ctl.rst());
}

#[test]
fn refused_delivery_reopens_the_window() {
    struct Refusing;
    impl SocketEvents for Refusing {
        fn received(&mut self, _data: Message, _push: bool) -> Delivery {
            Delivery::Refused
        }
    }

    let (_, mut server, _, _) = handshake(TcpConfig::default());
    let base = server.rcv.nxt;
    let wnd = server.rcv.wnd;

    let _ = server.segment_arrives(from_client(base, SERVER_ISS + 1, &[9u8; 100]), &mut Refusing, 1);
    // The sequence space advanced but the window credit came back
    assert_eq!(server.rcv.nxt, base + 100);
    assert_eq!(server.rcv.wnd, wnd);
}

#[test]
fn consuming_reopens_the_window() {
    let (_, mut server, _, mut server_events) = handshake(TcpConfig::default());
    let base = server.rcv.nxt;
    let wnd = server.rcv.wnd;

    let _ = server.segment_arrives(
        from_client(base, SERVER_ISS + 1, &[4u8; 1000]),
        &mut server_events,
        1,
    );
    assert_eq!(server.rcv.wnd, wnd - 1000);

    server.consumed(1000);
    assert_eq!(server.rcv.wnd, wnd);
}

#[test]
fn zero_window_arms_persist() {
    let config = TcpConfig {
        mss: 100,
        ..TcpConfig::default()
    };
    let (mut client, _, mut client_events, _) = handshake(config);

    client.send(Message::new(vec![0u8; 100]));
    let _ = client.segments(1);

    // The peer takes the data but closes its window
    let mut ack = from_server(SERVER_ISS + 1, CLIENT_ISS + 101, b"");
    ack.header.wnd = 0;
    let _ = client.segment_arrives(ack, &mut client_events, 2);
    assert_eq!(client.snd.wnd, 0);
    assert_eq!(client.persist_backoff, 1);

    // Nothing can be transmitted against a closed window
    client.send(Message::new(vec![0u8; 50]));
    assert!(client.segments(2).is_empty());
    assert_eq!(client.unsent.len(), 1);

    // The probe counter fires on the first backoff interval
    for now in 3..6 {
        let _ = client.on_tick(now);
    }
    assert_eq!(client.persist_probes, 1);

    // The window reopening disarms probing and releases the data
    let _ = client.segment_arrives(
        from_server(SERVER_ISS + 1, CLIENT_ISS + 101, b""),
        &mut client_events,
        6,
    );
    assert_eq!(client.persist_backoff, 0);
    let out = client.segments(6);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].payload.len(), 50);
}

#[test]
fn retransmission_timeout_backs_off() {
    let config = TcpConfig {
        mss: 100,
        ..TcpConfig::default()
    };
    let (mut client, _, _, _) = handshake(config);

    client.send(Message::new(vec![0u8; 100]));
    let segs = client.segments(1);
    assert_eq!(segs.len(), 1);

    // No acknowledgment ever comes
    let mut retransmitted = Vec::new();
    for now in 2..20 {
        let _ = client.on_tick(now);
        retransmitted.extend(client.segments(now));
    }
    assert!(!retransmitted.is_empty());
    assert_eq!(retransmitted[0].seq(), CLIENT_ISS + 1);
    assert!(client.nrtx >= 1);
    // The timeout doubled and the congestion window collapsed
    assert!(client.rtt.rto() >= 12);
    assert_eq!(client.cc.cwnd, 100);
    check_invariants(&client);
}

#[test]
fn lossy_link_eventually_delivers() {
    let config = TcpConfig {
        mss: 500,
        ..TcpConfig::default()
    };
    let (mut client, mut server, mut client_events, mut server_events) = handshake(config);

    let payload: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
    client.send(Message::new(payload.clone()));

    let mut rng = SmallRng::seed_from_u64(7);
    let mut now = 1;
    while server_events.received.len() < payload.len() && now < 1000 {
        for seg in client.segments(now) {
            if rng.gen_bool(0.25) {
                continue;
            }
            let _ = server.segment_arrives(seg, &mut server_events, now);
        }
        for seg in server.segments(now) {
            if rng.gen_bool(0.25) {
                continue;
            }
            let _ = client.segment_arrives(seg, &mut client_events, now);
        }
        let _ = client.on_tick(now);
        let _ = server.on_tick(now);
        check_invariants(&client);
        check_invariants(&server);
        now += 1;
    }

    assert_eq!(server_events.received, payload);

    // Let the final acknowledgments land over a clean link
    for _ in 0..200 {
        deliver(&mut client, &mut server, &mut server_events, now);
        deliver(&mut server, &mut client, &mut client_events, now);
        let _ = client.on_tick(now);
        let _ = server.on_tick(now);
        now += 1;
    }
    assert_eq!(client_events.sent, payload.len() as u32);
    assert_eq!(client.snd.una, client.snd.nxt);
    assert!(client.unacked.is_empty());
}
