//! The protocol engine of a user-space TCP acceleration stack.
//!
//! Frames come off a kernel-bypass datapath already demultiplexed to this
//! process; the engine parses them, runs the connection state machine, and
//! reports what happened through application callbacks. Everything runs to
//! completion on the caller's thread: no internal queues, no locks, no time
//! source of its own. The embedding supplies ticks and owns every connection
//! record.
//!
//! The pieces:
//!
//! - [`tcp::dispatch`] peels frames and routes segments to records
//! - [`tcp::Tcb`] is one connection's entire state
//! - [`tcp::events::SocketEvents`] is how the application hears about it
//! - [`Message`] carries payload bytes without copying them

pub mod endpoint;
pub mod message;
pub mod tcp;

pub use message::{Chunk, Message};
