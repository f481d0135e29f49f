//! Frame admission: peels the IP header off a raw frame, parses the TCP
//! header, and routes the segment to a connection record.
//!
//! The engine does not own a routing table; the embedding looks the
//! connection up by [`IncomingFrame::id`] and hands the record back in. A
//! frame with no record draws the closed-state reset.

use super::{
    events::SocketEvents,
    parsing::{ParseError, TcpHeader},
    segment::Segment,
    tcb::{segment_arrives_closed, SegmentArrivesResult, Tcb},
};
use crate::{
    endpoint::{Address, ConnectionId, Endpoint},
    Message,
};
use thiserror::Error as ThisError;
use tracing::trace;

const IPPROTO_TCP: u8 = 6;

/// Why a frame could not be turned into a segment.
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum FrameError {
    #[error("The frame ended before its headers did")]
    Truncated,
    #[error("Unsupported IP version {0}")]
    UnsupportedVersion(u8),
    #[error("The frame does not carry TCP")]
    NotTcp,
    #[error("{0}")]
    Header(#[from] ParseError),
}

/// A parsed frame: who sent it, who it is for, and the segment it carried.
#[derive(Debug, Clone)]
pub struct IncomingFrame {
    pub src: Address,
    pub dst: Address,
    pub segment: Segment,
}

impl IncomingFrame {
    /// The connection the frame belongs to, from the receiver's point of
    /// view.
    pub fn id(&self) -> ConnectionId {
        ConnectionId::new(
            Endpoint::new(self.dst, self.segment.header.dst_port),
            Endpoint::new(self.src, self.segment.header.src_port),
        )
    }
}

/// Parses a raw IPv4 or IPv6 frame down to the TCP segment inside it.
pub fn parse_frame(frame: &[u8]) -> Result<IncomingFrame, FrameError> {
    let first = *frame.first().ok_or(FrameError::Truncated)?;
    match first >> 4 {
        4 => parse_v4(frame),
        6 => parse_v6(frame),
        version => Err(FrameError::UnsupportedVersion(version)),
    }
}

fn parse_v4(frame: &[u8]) -> Result<IncomingFrame, FrameError> {
    if frame.len() < 20 {
        return Err(FrameError::Truncated);
    }
    if frame[9] != IPPROTO_TCP {
        return Err(FrameError::NotTcp);
    }
    let ihl = ((frame[0] & 0xf) as usize) * 4;
    let total_len = u16::from_be_bytes([frame[2], frame[3]]) as usize;
    if ihl < 20 || total_len < ihl || frame.len() < total_len {
        return Err(FrameError::Truncated);
    }

    let mut src = [0u8; 4];
    src.copy_from_slice(&frame[12..16]);
    let mut dst = [0u8; 4];
    dst.copy_from_slice(&frame[16..20]);

    let (segment, _) = parse_tcp(&frame[ihl..total_len])?;
    Ok(IncomingFrame {
        src: src.into(),
        dst: dst.into(),
        segment,
    })
}

fn parse_v6(frame: &[u8]) -> Result<IncomingFrame, FrameError> {
    if frame.len() < 40 {
        return Err(FrameError::Truncated);
    }
    // Extension headers never show up on the accelerated path
    if frame[6] != IPPROTO_TCP {
        return Err(FrameError::NotTcp);
    }
    let payload_len = u16::from_be_bytes([frame[4], frame[5]]) as usize;
    if frame.len() < 40 + payload_len {
        return Err(FrameError::Truncated);
    }

    let mut src = [0u8; 16];
    src.copy_from_slice(&frame[8..24]);
    let mut dst = [0u8; 16];
    dst.copy_from_slice(&frame[24..40]);

    let (segment, _) = parse_tcp(&frame[40..40 + payload_len])?;
    Ok(IncomingFrame {
        src: src.into(),
        dst: dst.into(),
        segment,
    })
}

fn parse_tcp(bytes: &[u8]) -> Result<(Segment, usize), FrameError> {
    let (header, header_len) = TcpHeader::from_bytes(bytes)?;
    let payload = Message::new(bytes[header_len..].to_vec());
    Ok((Segment::new(header, payload), header_len))
}

/// What the dispatcher did with a frame.
#[must_use]
#[derive(Debug)]
pub enum DispatchResult {
    /// The segment reached a connection record
    Handled(SegmentArrivesResult),
    /// No record matched; transmit this reset
    Reset(TcpHeader),
    /// No record matched and nothing is owed
    Dropped,
}

/// Routes a parsed frame to its connection record, or answers it from the
/// closed state when the embedding found none.
pub fn dispatch(
    frame: IncomingFrame,
    tcb: Option<&mut Tcb>,
    events: &mut dyn SocketEvents,
    now: u32,
) -> DispatchResult {
    match tcb {
        Some(tcb) => DispatchResult::Handled(tcb.segment_arrives(frame.segment, events, now)),
        None => match segment_arrives_closed(&frame.segment) {
            Some(reset) => {
                trace!(id = %frame.id(), "No connection, resetting");
                DispatchResult::Reset(reset)
            }
            None => DispatchResult::Dropped,
        },
    }
}
