//! Byte collections with efficient operations for protocol queues.
//!
//! This module primarily implements the [`Message`] collection.

use std::{collections::VecDeque, fmt::Display};

mod chunk;
pub use chunk::Chunk;

mod message_bytes;
pub use message_bytes::MessageBytes;

/// A chain of byte buffers with cheap trim, split, and splice operations.
///
/// Segment payloads live in whatever buffers the datapath handed us, often
/// several per segment, and acknowledgments release or trim them from the
/// front. A message tracks both its visible length and the capacity of the
/// buffers it holds, so the queue accounting can tell a buffer that was
/// released from one that merely shrank in place.
#[derive(Debug, Clone, Default)]
pub struct Message {
    chunks: VecDeque<Chunk>,
    len: usize,
}

impl Message {
    /// Creates a new message with the given body content.
    pub fn new(body: impl Into<Chunk>) -> Self {
        let body = body.into();
        let len = body.len();
        let mut chunks = VecDeque::new();
        chunks.push_back(body);
        Self { chunks, len }
    }

    /// Appends a buffer to the end of the message.
    pub fn push(&mut self, chunk: impl Into<Chunk>) {
        let chunk = chunk.into();
        self.len += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Adds the given message to the end of this one.
    pub fn concatenate(&mut self, other: Message) {
        self.len += other.len;
        self.chunks.extend(other.chunks);
    }

    /// Removes the first `len` bytes from the message and returns them as a
    /// new message. Chunk boundaries are preserved; a chunk straddling the
    /// split point ends up shared by both messages.
    pub fn cut(&mut self, len: usize) -> Self {
        assert!(len <= self.len);
        self.len -= len;

        let mut chunks = VecDeque::new();
        let mut to_remove = len;

        while let Some(mut head) = self.chunks.pop_front() {
            let head_len = head.len();
            if head_len <= to_remove {
                to_remove -= head_len;
                chunks.push_back(head);
            } else {
                if to_remove > 0 {
                    let mut front = head.clone();
                    front.end = front.start + to_remove;
                    chunks.push_back(front);
                }
                head.start += to_remove;
                self.chunks.push_front(head);
                break;
            }
        }

        Self { chunks, len }
    }

    /// Discards the first `len` bytes. Returns the total capacity of the
    /// buffers that were released outright; a buffer that was only shrunk in
    /// place contributes nothing.
    pub fn remove_front(&mut self, len: usize) -> usize {
        assert!(len <= self.len);
        self.len -= len;

        let mut to_remove = len;
        let mut freed = 0;

        while let Some(head) = self.chunks.front_mut() {
            let head_len = head.len();
            if head_len <= to_remove {
                to_remove -= head_len;
                freed += head.capacity();
                self.chunks.pop_front();
            } else {
                head.start += to_remove;
                break;
            }
        }

        freed
    }

    /// Shortens the message to `len` bytes, discarding the tail. Returns the
    /// total capacity of the buffers released.
    pub fn truncate(&mut self, len: usize) -> usize {
        assert!(len <= self.len);

        let mut to_keep = len;
        let mut kept = 0;
        for chunk in self.chunks.iter_mut() {
            if to_keep == 0 {
                break;
            }
            kept += 1;
            let chunk_len = chunk.len();
            if chunk_len <= to_keep {
                to_keep -= chunk_len;
            } else {
                chunk.end = chunk.start + to_keep;
                to_keep = 0;
            }
        }

        let mut freed = 0;
        while self.chunks.len() > kept {
            if let Some(tail) = self.chunks.pop_back() {
                freed += tail.capacity();
            }
        }

        self.len = len;
        freed
    }

    /// The number of visible bytes in the message.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the message contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The total size of the buffers the message holds, trimmed or not.
    pub fn capacity(&self) -> usize {
        self.chunks.iter().map(Chunk::capacity).sum()
    }

    /// The number of buffers the message holds.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Returns an iterator over the bytes of the entire message.
    pub fn iter(&self) -> MessageBytes {
        MessageBytes::new(&self.chunks)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.iter().collect()
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.iter() {
            write!(f, "{byte:x} ")?;
        }
        Ok(())
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for Message {}

impl From<Vec<u8>> for Message {
    fn from(val: Vec<u8>) -> Self {
        Message::new(val)
    }
}

impl From<&[u8]> for Message {
    fn from(val: &[u8]) -> Self {
        Message::new(val)
    }
}

impl<const L: usize> From<[u8; L]> for Message {
    fn from(val: [u8; L]) -> Self {
        Message::new(val)
    }
}
