use super::parsing::TcpHeader;
use crate::Message;

/// A segment as the engine passes it around: the parsed header plus the
/// payload buffers, separated from whatever frame carried them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: TcpHeader,
    pub payload: Message,
}

impl Segment {
    pub fn new(header: TcpHeader, payload: Message) -> Self {
        Self { header, payload }
    }

    /// The first sequence number the segment occupies.
    pub fn seq(&self) -> u32 {
        self.header.seq
    }

    /// The length of the segment in sequence space. SYN and FIN each occupy
    /// one sequence number in addition to the payload bytes.
    pub fn seg_len(&self) -> u32 {
        self.payload.len() as u32 + self.header.ctl.syn() as u32 + self.header.ctl.fin() as u32
    }

    /// One past the last sequence number the segment occupies.
    pub fn end_seq(&self) -> u32 {
        self.seq().wrapping_add(self.seg_len())
    }

    /// The total size of the payload buffers the segment holds.
    pub fn capacity(&self) -> usize {
        self.payload.capacity()
    }
}
