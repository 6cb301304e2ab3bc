//! Ranging frames and their wire layout
//!
//! Every frame starts with the same 6-byte header:
//!
//! | Offset | Size | Field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 2    | frame control, always `0x41 0x88`       |
//! | 2      | 1    | [`MessageType`]                         |
//! | 3      | 1    | sequence number                         |
//! | 4      | 1    | initiator of the exchange (DATA: sender)|
//! | 5      | 1    | target of the exchange (DATA: `0xFF`)   |
//!
//! The initiator and target fields name the two participants of an exchange
//! and stay the same on every frame of it, no matter who transmits.
//!
//! POLL appends two flag bytes: "target measures too" and "double-sided".
//! FINAL appends three 32-bit timestamp slots and a [`Diagnostics`] block.
//! DATA appends an arbitrary payload. Multi-byte fields are little-endian.
//!
//! Received frames are checked against a locally synthesized expected frame
//! with [`matches_expected`], which ignores the sequence number.

use core::ops::Deref;

use byte::{BytesExt, LE};
#[cfg(feature = "defmt")]
use defmt::Format;
use heapless::Vec;

use crate::{diagnostics::Diagnostics, time::Instant};

/// Largest PSDU the radio handles, FCS included
pub const MAX_FRAME_LEN: usize = 127;

/// Length of the frame check sequence appended by the radio
pub const FCS_LEN: usize = 2;

/// Length of the header shared by all frames
pub const HEADER_LEN: usize = 6;

/// Frame control bytes every ranging frame starts with
pub const FRAME_CONTROL: [u8; 2] = [0x41, 0x88];

/// Target ID of broadcast DATA frames
pub const BROADCAST_ID: u8 = 0xff;

/// Length of a POLL frame
pub const POLL_LEN: usize = 8;
/// Length of a RESPONSE frame
pub const RESPONSE_LEN: usize = HEADER_LEN;
/// Length of a FINAL frame
pub const FINAL_LEN: usize = 32;

/// Bytes of a received POLL compared against the expected one
pub const POLL_PREFIX_LEN: usize = HEADER_LEN;
/// Bytes of a received RESPONSE compared against the expected one
pub const RESPONSE_PREFIX_LEN: usize = HEADER_LEN;
/// Bytes of a received FINAL compared against the expected one
pub const FINAL_PREFIX_LEN: usize = HEADER_LEN;

/// Number of timestamp slots in a FINAL frame
pub const TIMESTAMP_SLOTS: usize = 3;

const TYPE_IDX: usize = 2;
const SEQ_IDX: usize = 3;
const INITIATOR_IDX: usize = 4;
const TARGET_IDX: usize = 5;
const TARGET_MEASURES_IDX: usize = 6;
const DOUBLE_SIDED_IDX: usize = 7;
const TIMESTAMP_IDX: usize = 6;
const FPP_IDX: usize = 18;
const RXP_IDX: usize = 22;
const NOISE_STD_IDX: usize = 26;
const SKEW_IDX: usize = 28;

/// The kind of a ranging frame
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[repr(u8)]
pub enum MessageType {
    /// Opens an exchange
    Poll = 0x0a,
    /// Answer of the responder in double-sided exchanges
    Response = 0x0b,
    /// Carries the timestamps of one side
    Final = 0x0c,
    /// Payload relayed to the host of every receiver
    Data = 0x0d,
}

impl MessageType {
    /// Decodes the message type byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x0a => Some(MessageType::Poll),
            0x0b => Some(MessageType::Response),
            0x0c => Some(MessageType::Final),
            0x0d => Some(MessageType::Data),
            _ => None,
        }
    }
}

/// An error that can occur while decoding or encoding frames
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum FrameError {
    /// Frame is shorter than its type requires
    TooShort {
        /// Length of the frame
        len: usize,
        /// Length the frame would have needed
        required_len: usize,
    },
    /// Frame does not fit into a PSDU
    TooLong {
        /// Length of the frame including the FCS
        len: usize,
    },
    /// Frame control bytes are not the ranging ones
    BadFrameControl,
    /// Type byte is not a known [`MessageType`]
    UnknownType(u8),
    /// Frame is of another type than expected
    WrongType(MessageType),
    /// Frame differs from the expected one in its structural prefix
    Mismatch,
    /// A FINAL carries two or three timestamps
    TimestampCount(usize),
    /// Field at the given offset could not be read or written
    Field {
        /// Offset of the field
        offset: usize,
    },
}

/// The common header of a frame
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Header {
    /// Kind of frame
    pub message_type: MessageType,
    /// Sequence number
    pub seq: u8,
    /// Initiator of the exchange, or sender of DATA
    pub initiator: u8,
    /// Target of the exchange, or [`BROADCAST_ID`]
    pub target: u8,
}

/// Decodes the header of a received frame
pub fn decode_header(bytes: &[u8]) -> Result<Header, FrameError> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameError::TooShort {
            len: bytes.len(),
            required_len: HEADER_LEN,
        });
    }
    if bytes[..2] != FRAME_CONTROL {
        return Err(FrameError::BadFrameControl);
    }
    let message_type =
        MessageType::from_byte(bytes[TYPE_IDX]).ok_or(FrameError::UnknownType(bytes[TYPE_IDX]))?;

    Ok(Header {
        message_type,
        seq: bytes[SEQ_IDX],
        initiator: bytes[INITIATOR_IDX],
        target: bytes[TARGET_IDX],
    })
}

/// Compares a received frame with the expected one
///
/// The first `prefix_len` bytes must be identical, except for the sequence
/// number which is not compared. Frames shorter than the prefix never match.
pub fn matches_expected(received: &[u8], expected: &[u8], prefix_len: usize) -> bool {
    if received.len() < prefix_len || expected.len() < prefix_len {
        return false;
    }
    received[..prefix_len]
        .iter()
        .zip(&expected[..prefix_len])
        .enumerate()
        .all(|(i, (r, e))| i == SEQ_IDX || r == e)
}

/// A ranging frame, as transmitted (without FCS)
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame(Vec<u8, MAX_FRAME_LEN>);

impl Frame {
    fn blank(message_type: MessageType, seq: u8, initiator: u8, target: u8, len: usize) -> Self {
        let mut bytes = Vec::new();
        // Clamped to the capacity, so this cannot fail
        let _ = bytes.resize(len.clamp(HEADER_LEN, MAX_FRAME_LEN), 0);
        bytes[..2].copy_from_slice(&FRAME_CONTROL);
        bytes[TYPE_IDX] = message_type as u8;
        bytes[SEQ_IDX] = seq;
        bytes[INITIATOR_IDX] = initiator;
        bytes[TARGET_IDX] = target;
        Frame(bytes)
    }

    /// Copies a received frame
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        Vec::from_slice(bytes).map(Frame).map_err(|_| FrameError::TooLong {
            len: bytes.len() + FCS_LEN,
        })
    }

    /// The raw bytes of the frame
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decodes the header
    pub fn header(&self) -> Result<Header, FrameError> {
        decode_header(&self.0)
    }

    /// Reads the timestamp in the given FINAL slot, zero-extended
    pub fn timestamp(&self, slot: usize) -> Result<u32, FrameError> {
        let offset = timestamp_offset(slot)?;
        read_u32(&self.0, offset)
    }

    /// Writes the low 32 bits of `instant` into the given FINAL slot
    pub fn set_timestamp(&mut self, slot: usize, instant: Instant) -> Result<(), FrameError> {
        let offset = timestamp_offset(slot)?;
        write_u32(&mut self.0, offset, instant.truncated())
    }

    fn write_diagnostics(&mut self, diagnostics: &Diagnostics) -> Result<(), FrameError> {
        write_u32(&mut self.0, FPP_IDX, diagnostics.fpp_dbm.to_bits())?;
        write_u32(&mut self.0, RXP_IDX, diagnostics.rxp_dbm.to_bits())?;
        write_u16(&mut self.0, NOISE_STD_IDX, diagnostics.noise_std)?;
        write_u32(&mut self.0, SKEW_IDX, diagnostics.skew.to_bits())
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

fn timestamp_offset(slot: usize) -> Result<usize, FrameError> {
    if slot < TIMESTAMP_SLOTS {
        Ok(TIMESTAMP_IDX + 4 * slot)
    } else {
        Err(FrameError::Field {
            offset: TIMESTAMP_IDX + 4 * slot,
        })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, FrameError> {
    let mut cursor = offset;
    let value: u32 = bytes
        .read_with(&mut cursor, LE)
        .map_err(|_| FrameError::Field { offset })?;
    Ok(value)
}

fn read_u16(bytes: &[u8], offset: usize) -> Result<u16, FrameError> {
    let mut cursor = offset;
    let value: u16 = bytes
        .read_with(&mut cursor, LE)
        .map_err(|_| FrameError::Field { offset })?;
    Ok(value)
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) -> Result<(), FrameError> {
    let mut cursor = offset;
    bytes
        .write_with(&mut cursor, value, LE)
        .map_err(|_| FrameError::Field { offset })
}

fn write_u16(bytes: &mut [u8], offset: usize, value: u16) -> Result<(), FrameError> {
    let mut cursor = offset;
    bytes
        .write_with(&mut cursor, value, LE)
        .map_err(|_| FrameError::Field { offset })
}

/// Builds the POLL that opens an exchange
pub fn encode_poll(
    seq: u8,
    initiator: u8,
    target: u8,
    target_measures: bool,
    double_sided: bool,
) -> Frame {
    let mut frame = Frame::blank(MessageType::Poll, seq, initiator, target, POLL_LEN);
    frame.0[TARGET_MEASURES_IDX] = target_measures as u8;
    frame.0[DOUBLE_SIDED_IDX] = double_sided as u8;
    frame
}

/// Builds the RESPONSE of a double-sided exchange
pub fn encode_response(seq: u8, initiator: u8, target: u8) -> Frame {
    Frame::blank(MessageType::Response, seq, initiator, target, RESPONSE_LEN)
}

/// Builds a FINAL carrying the sender's timestamps and diagnostics
///
/// Takes two timestamps for single-sided exchanges and three for
/// double-sided ones. Unused slots stay zero.
pub fn encode_final(
    seq: u8,
    initiator: u8,
    target: u8,
    timestamps: &[Instant],
    diagnostics: &Diagnostics,
) -> Result<Frame, FrameError> {
    if !(2..=TIMESTAMP_SLOTS).contains(&timestamps.len()) {
        return Err(FrameError::TimestampCount(timestamps.len()));
    }

    let mut frame = Frame::blank(MessageType::Final, seq, initiator, target, FINAL_LEN);
    for (slot, instant) in timestamps.iter().enumerate() {
        frame.set_timestamp(slot, *instant)?;
    }
    frame.write_diagnostics(diagnostics)?;
    Ok(frame)
}

/// Builds a broadcast DATA frame
pub fn encode_data(seq: u8, sender: u8, payload: &[u8]) -> Result<Frame, FrameError> {
    let len = HEADER_LEN + payload.len() + FCS_LEN;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLong { len });
    }

    let mut frame = Frame::blank(MessageType::Data, seq, sender, BROADCAST_ID, HEADER_LEN);
    frame
        .0
        .extend_from_slice(payload)
        .map_err(|_| FrameError::TooLong { len })?;
    Ok(frame)
}

/// The frame an exchange step expects to receive next
///
/// Only the header is meaningful, for use with [`matches_expected`].
pub fn expected(message_type: MessageType, initiator: u8, target: u8) -> Frame {
    Frame::blank(message_type, 0, initiator, target, HEADER_LEN)
}

fn expect_type(bytes: &[u8], expected: MessageType, len: usize) -> Result<Header, FrameError> {
    let header = decode_header(bytes)?;
    if header.message_type != expected {
        return Err(FrameError::WrongType(header.message_type));
    }
    if bytes.len() < len {
        return Err(FrameError::TooShort {
            len: bytes.len(),
            required_len: len,
        });
    }
    Ok(header)
}

/// A length-checked POLL
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PollView {
    /// Header of the POLL
    pub header: Header,
    /// Whether the target computes the range too
    pub target_measures: bool,
    /// Whether the exchange is double-sided
    pub double_sided: bool,
}

impl PollView {
    /// Decodes a received POLL
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let header = expect_type(bytes, MessageType::Poll, POLL_LEN)?;
        Ok(PollView {
            header,
            target_measures: bytes[TARGET_MEASURES_IDX] != 0,
            double_sided: bytes[DOUBLE_SIDED_IDX] != 0,
        })
    }
}

/// A length-checked FINAL
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalView {
    /// Header of the FINAL
    pub header: Header,
    /// The three timestamp slots, zero where unused
    pub timestamps: [u32; TIMESTAMP_SLOTS],
    /// Diagnostics of the sender
    pub diagnostics: Diagnostics,
}

impl FinalView {
    /// Decodes a received FINAL
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let header = expect_type(bytes, MessageType::Final, FINAL_LEN)?;

        let mut timestamps = [0; TIMESTAMP_SLOTS];
        for (slot, timestamp) in timestamps.iter_mut().enumerate() {
            *timestamp = read_u32(bytes, timestamp_offset(slot)?)?;
        }

        let diagnostics = Diagnostics {
            fpp_dbm: f32::from_bits(read_u32(bytes, FPP_IDX)?),
            rxp_dbm: f32::from_bits(read_u32(bytes, RXP_IDX)?),
            noise_std: read_u16(bytes, NOISE_STD_IDX)?,
            skew: f32::from_bits(read_u32(bytes, SKEW_IDX)?),
        };

        Ok(FinalView {
            header,
            timestamps,
            diagnostics,
        })
    }
}

/// Splits a received DATA frame into header and payload
pub fn decode_data(bytes: &[u8]) -> Result<(Header, &[u8]), FrameError> {
    let header = expect_type(bytes, MessageType::Data, HEADER_LEN)?;
    Ok((header, &bytes[HEADER_LEN..]))
}
