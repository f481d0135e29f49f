//! The protocol engine: everything between a raw frame and the application
//! callbacks.
//!
//! The engine is a pure state machine. It never spawns, sleeps, or locks;
//! the embedding feeds it frames with [`parse_frame`] and [`dispatch`],
//! drives time with [`Tcb::on_tick`], and drains output with
//! [`Tcb::segments`]. Connection records are plain values the embedding owns
//! and indexes however it likes.

pub mod congestion;
pub mod dispatch;
pub mod events;
pub mod options;
pub mod parsing;
pub mod segment;
pub mod seq;
pub mod tcb;

pub use dispatch::{dispatch, parse_frame, DispatchResult, FrameError, IncomingFrame};
pub use segment::Segment;
pub use tcb::{
    generate_iss, segment_arrives_closed, segment_arrives_listen, ListenResult,
    SegmentArrivesResult, State, Tcb, TcpConfig, TickResult,
};
