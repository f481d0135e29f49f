//! Application callbacks.
//!
//! After processing an arriving segment the engine reports what happened to
//! the application through a [`SocketEvents`] implementation: bytes
//! acknowledged, data delivered, the peer closing, the connection dying. Each
//! callback returns a verdict, and a callback may answer [`Verdict::Abort`]
//! to tear the connection down mid-delivery; the engine checks the verdict
//! after every call and touches nothing of the connection afterwards.

use crate::Message;
use thiserror::Error as ThisError;

/// What a callback wants done with the connection.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    /// Abort the connection; the engine stops processing immediately
    Abort,
}

/// What the application did with delivered data.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Consumed,
    /// The application cannot take the data right now. It is dropped and the
    /// receive window reopened, so the peer will retransmit.
    Refused,
    Abort,
}

/// Why a connection died without the application asking for it.
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    #[error("The connection was reset by the peer")]
    Reset,
    #[error("The connection was aborted")]
    Aborted,
}

/// Callbacks delivered while a segment is processed.
///
/// The default implementations accept everything and are what a passive
/// embedding wants.
pub trait SocketEvents {
    /// An active open completed.
    fn connected(&mut self) -> Verdict {
        Verdict::Continue
    }

    /// A passive open completed.
    fn accepted(&mut self) -> Verdict {
        Verdict::Continue
    }

    /// In-order data arrived. `push` reports the PSH control bit.
    fn received(&mut self, data: Message, push: bool) -> Delivery {
        let _ = (data, push);
        Delivery::Consumed
    }

    /// The peer acknowledged `bytes` new bytes.
    fn sent(&mut self, bytes: u32) -> Verdict {
        let _ = bytes;
        Verdict::Continue
    }

    /// The peer finished sending; no more data will arrive.
    fn remote_closed(&mut self) -> Verdict {
        Verdict::Continue
    }

    /// A TIME_WAIT record was recycled into a fresh passive open.
    fn reused(&mut self) -> Verdict {
        Verdict::Continue
    }

    /// The connection died. No further callbacks will be delivered.
    fn error(&mut self, reason: SocketError) {
        let _ = reason;
    }
}

/// Accepts every event and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEvents;

impl SocketEvents for NoEvents {}
