use thiserror::Error as ThisError;

/// The number of 32-bit words in a TCP header without options
const BASE_HEADER_WORDS: u8 = 5;
/// The number of bytes in a TCP header without options
const BASE_HEADER_OCTETS: usize = BASE_HEADER_WORDS as usize * 4;
/// The largest data offset the four-bit field can express, in words
const MAX_HEADER_WORDS: u8 = 15;

/// The data for a TCP header.
///
/// All multi-byte fields are kept in host order; parsing and serialization do
/// the network-order conversion. The checksum is carried opaquely: the
/// datapath that hands us frames and the transmitter that emits them both sit
/// on checksum-offloading hardware, so the engine neither verifies nor
/// computes it.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct TcpHeader {
    /// The source port number
    pub src_port: u16,
    /// The destination port number
    pub dst_port: u16,
    /// The sequence number of the first data octet in this segment (except
    /// when SYN is present, in which case it is the ISN and the first data
    /// octet is ISN+1)
    pub seq: u32,
    /// If the ACK control bit is set, the next sequence number the sender of
    /// the segment is expecting to receive
    pub ack: u32,
    /// The number of 32-bit words in the TCP header, options included
    pub data_offset: u8,
    /// Flags that adjust how segments are handled
    pub ctl: Control,
    /// The number of data octets, beginning with the one indicated in the
    /// acknowledgment field, which the sender of this segment is willing to
    /// accept. Unscaled; scaling is applied by the receive processor.
    pub wnd: u16,
    /// The header checksum, carried but not interpreted
    pub checksum: u16,
    /// The urgent pointer
    pub urg: u16,
    /// The raw option area, `(data_offset - 5) * 4` bytes of it
    pub options: Vec<u8>,
}

impl TcpHeader {
    /// Parses a serialized TCP header into its constituent fields. Returns
    /// the header and its length in bytes so the caller can locate the text.
    pub fn from_bytes(segment: &[u8]) -> Result<(Self, usize), ParseError> {
        if segment.len() < BASE_HEADER_OCTETS {
            return Err(ParseError::HeaderTooShort);
        }

        let src_port = u16::from_be_bytes([segment[0], segment[1]]);
        let dst_port = u16::from_be_bytes([segment[2], segment[3]]);
        let seq = u32::from_be_bytes([segment[4], segment[5], segment[6], segment[7]]);
        let ack = u32::from_be_bytes([segment[8], segment[9], segment[10], segment[11]]);
        let data_offset = segment[12] >> 4;
        let ctl = Control::from(segment[13] & 0b11_1111);
        let wnd = u16::from_be_bytes([segment[14], segment[15]]);
        let checksum = u16::from_be_bytes([segment[16], segment[17]]);
        let urg = u16::from_be_bytes([segment[18], segment[19]]);

        if data_offset < BASE_HEADER_WORDS {
            return Err(ParseError::IllegalDataOffset);
        }
        let header_len = data_offset as usize * 4;
        if segment.len() < header_len {
            return Err(ParseError::HeaderTooShort);
        }
        let options = segment[BASE_HEADER_OCTETS..header_len].to_vec();

        Ok((
            TcpHeader {
                src_port,
                dst_port,
                seq,
                ack,
                data_offset,
                ctl,
                wnd,
                checksum,
                urg,
                options,
            },
            header_len,
        ))
    }

    /// Size of the header in bytes
    pub fn bytes(&self) -> usize {
        self.data_offset as usize * 4
    }

    /// Convert the header to its native serialized format, ready to attach to
    /// a segment and hand to the transmitter.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bytes());
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.ack.to_be_bytes());
        out.push(self.data_offset << 4);
        out.push(self.ctl.into());
        out.extend_from_slice(&self.wnd.to_be_bytes());
        out.extend_from_slice(&self.checksum.to_be_bytes());
        out.extend_from_slice(&self.urg.to_be_bytes());
        out.extend_from_slice(&self.options);
        out
    }
}

/// An error that occurred while parsing a TCP header
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum ParseError {
    #[error("Too few bytes to constitute a TCP header")]
    HeaderTooShort,
    #[error("Data offset was smaller than the fixed header")]
    IllegalDataOffset,
}

/// Used for building a TCP header
#[derive(Debug)]
pub struct TcpHeaderBuilder(TcpHeader);

impl TcpHeaderBuilder {
    /// Initialize the TCP header with defaults and the given values
    pub fn new(src_port: u16, dst_port: u16, seq: u32) -> Self {
        Self(TcpHeader {
            src_port,
            dst_port,
            seq,
            wnd: 0,
            ack: 0,
            urg: 0,
            ctl: Control::default(),
            options: Vec::new(),

            // Filled in by .build()
            data_offset: 0,

            // Left for the offload path
            checksum: 0,
        })
    }

    /// Set the window size
    pub fn wnd(mut self, wnd: u16) -> Self {
        self.0.wnd = wnd;
        self
    }

    /// Set the acknowledgment number
    pub fn ack(mut self, ack: u32) -> Self {
        self.0.ack = ack;
        self.0.ctl.set_ack(true);
        self
    }

    /// Set the psh bit up
    pub fn psh(mut self) -> Self {
        self.0.ctl.set_psh(true);
        self
    }

    /// Set the rst bit up
    pub fn rst(mut self) -> Self {
        self.0.ctl.set_rst(true);
        self
    }

    /// Set the syn bit up
    pub fn syn(mut self) -> Self {
        self.0.ctl.set_syn(true);
        self
    }

    /// Set the fin bit up
    pub fn fin(mut self) -> Self {
        self.0.ctl.set_fin(true);
        self
    }

    /// Set the option area. Must already be padded to a multiple of four
    /// bytes with NOP or EOL.
    pub fn options(mut self, options: Vec<u8>) -> Self {
        self.0.options = options;
        self
    }

    /// Get the finished header
    pub fn build(self) -> Result<TcpHeader, BuildHeaderError> {
        if self.0.options.len() % 4 != 0 {
            return Err(BuildHeaderError::UnpaddedOptions);
        }
        let words = BASE_HEADER_WORDS as usize + self.0.options.len() / 4;
        if words > MAX_HEADER_WORDS as usize {
            return Err(BuildHeaderError::OverlyLongOptions);
        }
        let mut header = self.0;
        header.data_offset = words as u8;
        Ok(header)
    }
}

/// An error that occurred while building a TCP header
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum BuildHeaderError {
    #[error("The option area was not padded to a multiple of four bytes")]
    UnpaddedOptions,
    #[error("The option area does not fit in the data offset field")]
    OverlyLongOptions,
}

/// The control bits of a TCP header
#[derive(Default, Hash, PartialEq, Eq, Clone, Copy)]
pub struct Control(u8);

impl Control {
    /// Create a new Control with the given bits
    pub const fn new(urg: bool, ack: bool, psh: bool, rst: bool, syn: bool, fin: bool) -> Self {
        Self(
            fin as u8
                | (syn as u8) << 1
                | (rst as u8) << 2
                | (psh as u8) << 3
                | (ack as u8) << 4
                | (urg as u8) << 5,
        )
    }

    /// Get whether the urgent pointer field is significant
    pub const fn urg(self) -> bool {
        self.bit(5)
    }

    /// Set whether the urgent pointer field is significant
    pub fn set_urg(&mut self, state: bool) {
        self.set_bit(5, state);
    }

    /// Get whether the acknowledgment field is significant
    pub const fn ack(self) -> bool {
        self.bit(4)
    }

    /// Set whether the acknowledgment field is significant
    pub fn set_ack(&mut self, state: bool) {
        self.set_bit(4, state);
    }

    /// Get whether the push function is requested
    pub const fn psh(self) -> bool {
        self.bit(3)
    }

    /// Set whether the push function is requested
    pub fn set_psh(&mut self, state: bool) {
        self.set_bit(3, state);
    }

    /// Get whether to reset the connection
    pub const fn rst(self) -> bool {
        self.bit(2)
    }

    /// Set whether to reset the connection
    pub fn set_rst(&mut self, state: bool) {
        self.set_bit(2, state);
    }

    /// Get whether to synchronize sequence numbers
    pub const fn syn(self) -> bool {
        self.bit(1)
    }

    /// Set whether to synchronize sequence numbers
    pub fn set_syn(&mut self, state: bool) {
        self.set_bit(1, state);
    }

    /// Get whether there is no more data to send
    pub const fn fin(self) -> bool {
        self.bit(0)
    }

    /// Set whether there is no more data to send
    pub fn set_fin(&mut self, state: bool) {
        self.set_bit(0, state);
    }

    /// Get the given bit
    const fn bit(self, bit: u8) -> bool {
        (self.0 >> bit) & 0b1 == 1
    }

    /// Set the given bit
    fn set_bit(&mut self, bit: u8, state: bool) {
        self.0 = (self.0 & !(1 << bit)) | ((state as u8) << bit);
    }
}

impl From<u8> for Control {
    fn from(n: u8) -> Self {
        Self(n)
    }
}

impl From<Control> for u8 {
    fn from(control: Control) -> Self {
        control.0
    }
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = ["FIN", "SYN", "RST", "PSH", "ACK", "URG"];
        write!(f, "Control(")?;
        let mut wrote = false;
        for (bit, name) in names.iter().enumerate() {
            if self.bit(bit as u8) {
                if wrote {
                    write!(f, ", ")?;
                }
                write!(f, "{name}")?;
                wrote = true;
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC_PORT: u16 = 0xcafe;
    const DST_PORT: u16 = 0xbabe;
    const SEQUENCE: u32 = 123456789;
    const WINDOW: u16 = 1024;
    const ACKNOWLEDGEMENT: u32 = 10;

    #[test]
    fn round_trip() {
        let header = TcpHeaderBuilder::new(SRC_PORT, DST_PORT, SEQUENCE)
            .wnd(WINDOW)
            .psh()
            .ack(ACKNOWLEDGEMENT)
            .build()
            .unwrap();
        let serial = header.serialize();
        assert_eq!(serial.len(), 20);

        let (parsed, header_len) = TcpHeader::from_bytes(&serial).unwrap();
        assert_eq!(header_len, 20);
        assert_eq!(parsed.src_port, SRC_PORT);
        assert_eq!(parsed.dst_port, DST_PORT);
        assert_eq!(parsed.seq, SEQUENCE);
        assert_eq!(parsed.ack, ACKNOWLEDGEMENT);
        assert_eq!(parsed.wnd, WINDOW);
        assert!(parsed.ctl.ack());
        assert!(parsed.ctl.psh());
        assert!(!parsed.ctl.syn());
        assert!(parsed.options.is_empty());
    }

    #[test]
    fn round_trip_with_options() {
        // MSS option plus a timestamp option, NOP-padded
        let options = vec![2, 4, 0x05, 0xb4, 8, 10, 0, 0, 0, 5, 0, 0, 0, 0, 1, 1];
        let header = TcpHeaderBuilder::new(SRC_PORT, DST_PORT, SEQUENCE)
            .syn()
            .options(options.clone())
            .build()
            .unwrap();
        assert_eq!(header.data_offset, 9);

        let serial = header.serialize();
        let (parsed, header_len) = TcpHeader::from_bytes(&serial).unwrap();
        assert_eq!(header_len, 36);
        assert_eq!(parsed.options, options);
        assert!(parsed.ctl.syn());
    }

    #[test]
    fn rejects_short_input() {
        let serial = TcpHeaderBuilder::new(SRC_PORT, DST_PORT, SEQUENCE)
            .build()
            .unwrap()
            .serialize();
        assert_eq!(
            TcpHeader::from_bytes(&serial[..19]),
            Err(ParseError::HeaderTooShort)
        );
    }

    #[test]
    fn rejects_truncated_options() {
        let mut serial = TcpHeaderBuilder::new(SRC_PORT, DST_PORT, SEQUENCE)
            .build()
            .unwrap()
            .serialize();
        // Claim six words of header but provide five
        serial[12] = 6 << 4;
        assert_eq!(
            TcpHeader::from_bytes(&serial),
            Err(ParseError::HeaderTooShort)
        );
    }

    #[test]
    fn rejects_unpadded_options() {
        let result = TcpHeaderBuilder::new(SRC_PORT, DST_PORT, SEQUENCE)
            .options(vec![2, 4, 0x05])
            .build();
        assert_eq!(result, Err(BuildHeaderError::UnpaddedOptions));
    }

    #[test]
    fn control_works() {
        let control = Control::new(true, false, true, false, true, false);
        assert!(control.urg());
        assert!(!control.ack());
        assert!(control.psh());
        assert!(!control.rst());
        assert!(control.syn());
        assert!(!control.fin());

        let control = {
            let mut control = Control::default();
            control.set_ack(true);
            control.set_rst(true);
            control.set_fin(true);
            control
        };
        assert!(!control.urg());
        assert!(control.ack());
        assert!(!control.psh());
        assert!(control.rst());
        assert!(!control.syn());
        assert!(control.fin());
    }
}
