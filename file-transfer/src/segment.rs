//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between sender and receiver is a [`Segment`].
//! This module is responsible for:
//! - Defining the on-wire binary layout (header fields, kind tag, payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`].
//! - Computing and verifying the CRC-64 checksum.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! +                       Checksum (CRC-64)                       +
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Kind tag            |          Payload ...          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 14 bytes.
//! seq(4) + checksum(8) + kind(2)
//!
//! The payload length is not carried in the header; it is whatever follows
//! the header in the datagram.
//!
//! # Checksum domain
//!
//! The checksum covers `seq ‖ kind ‖ payload` — the 4-byte sequence number,
//! the 2-byte kind tag and exactly the payload bytes present.  The checksum
//! field itself is not part of its own input.

use std::ffi::OsStr;
use std::path::Path;

use crc::{Crc, CRC_64_XZ};

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 14;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_CHECKSUM: usize = 4;
const OFF_KIND: usize = 12;

/// Wire tag of a DATA segment (ASCII `'D'`).
pub const TAG_DATA: u16 = 0x0044;
/// Wire tag of an ACK segment (ASCII `'A'`).
pub const TAG_ACK: u16 = 0x0041;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// What a segment carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// File name, file bytes, or (when empty) the end-of-transfer marker.
    Data,
    /// Acknowledgement of the DATA segment with the same sequence number.
    Ack,
    /// Unrecognised tag read off the wire. Never valid.
    Unknown(u16),
}

impl SegmentKind {
    pub fn from_tag(tag: u16) -> Self {
        match tag {
            TAG_DATA => SegmentKind::Data,
            TAG_ACK => SegmentKind::Ack,
            other => SegmentKind::Unknown(other),
        }
    }

    pub fn tag(self) -> u16 {
        match self {
            SegmentKind::Data => TAG_DATA,
            SegmentKind::Ack => TAG_ACK,
            SegmentKind::Unknown(tag) => tag,
        }
    }
}

impl std::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentKind::Data => write!(f, "DATA"),
            SegmentKind::Ack => write!(f, "ACK"),
            SegmentKind::Unknown(tag) => write!(f, "UNKNOWN({tag:#06x})"),
        }
    }
}

/// A complete protocol datagram: header fields + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Per-transfer counter. The first meaningful segment carries 1.
    pub seq: u32,
    /// CRC-64 as transmitted. Use [`Segment::seal`] to fill it in.
    pub checksum: u64,
    pub kind: SegmentKind,
    pub payload: Vec<u8>,
}

impl Segment {
    /// An unsealed DATA segment (checksum still zero).
    pub fn data(seq: u32, payload: Vec<u8>) -> Self {
        Self {
            seq,
            checksum: 0,
            kind: SegmentKind::Data,
            payload,
        }
    }

    /// An unsealed end-of-transfer marker: DATA with an empty payload.
    pub fn end_marker(seq: u32) -> Self {
        Self::data(seq, Vec::new())
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// `true` for a DATA segment with no payload.
    pub fn is_end_marker(&self) -> bool {
        self.kind == SegmentKind::Data && self.payload.is_empty()
    }

    pub fn is_ack(&self) -> bool {
        self.kind == SegmentKind::Ack
    }

    /// Compute the CRC-64 of `seq ‖ kind ‖ payload` from the current fields.
    pub fn compute_checksum(&self) -> u64 {
        let mut digest = CRC64.digest();
        digest.update(&self.seq.to_be_bytes());
        digest.update(&self.kind.tag().to_be_bytes());
        digest.update(&self.payload);
        digest.finalize()
    }

    /// Attach a freshly computed checksum.
    pub fn seal(mut self) -> Self {
        self.checksum = self.compute_checksum();
        self
    }

    /// `true` iff the kind is recognised and the stored checksum matches one
    /// recomputed from the current fields.
    pub fn is_valid(&self) -> bool {
        !matches!(self.kind, SegmentKind::Unknown(_)) && self.compute_checksum() == self.checksum
    }

    /// The sealed ACK acknowledging this segment: same sequence number, ACK
    /// kind, empty payload.
    pub fn to_ack(&self) -> Segment {
        Segment {
            seq: self.seq,
            checksum: 0,
            kind: SegmentKind::Ack,
            payload: Vec::new(),
        }
        .seal()
    }

    /// `true` if `ack` is the acknowledgement of this segment: an ACK whose
    /// sequence number and checksum equal those of [`Segment::to_ack`].
    pub fn acknowledged_by(&self, ack: &Segment) -> bool {
        if !ack.is_ack() || !ack.payload.is_empty() {
            return false;
        }
        let expected = self.to_ack();
        ack.seq == expected.seq && ack.checksum == expected.checksum
    }

    /// Serialise this segment into a newly allocated byte vector.
    ///
    /// The stored checksum is written as-is; call [`Segment::seal`] first.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];

        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 8].copy_from_slice(&self.checksum.to_be_bytes());
        buf[OFF_KIND..OFF_KIND + 2].copy_from_slice(&self.kind.tag().to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        buf
    }

    /// Parse a [`Segment`] from a raw datagram.
    ///
    /// Everything after the header is payload. The checksum is **not**
    /// verified here; see [`Segment::is_valid`].
    pub fn decode(buf: &[u8]) -> Result<Self, FramingError> {
        if buf.len() < HEADER_LEN {
            return Err(FramingError::Truncated { len: buf.len() });
        }

        let seq = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let mut checksum = [0u8; 8];
        checksum.copy_from_slice(&buf[OFF_CHECKSUM..OFF_CHECKSUM + 8]);
        let tag = u16::from_be_bytes([buf[OFF_KIND], buf[OFF_KIND + 1]]);

        Ok(Segment {
            seq,
            checksum: u64::from_be_bytes(checksum),
            kind: SegmentKind::from_tag(tag),
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Errors that can arise when framing a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// Datagram shorter than the fixed header.
    Truncated { len: usize },
}

impl std::fmt::Display for FramingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramingError::Truncated { len } => {
                write!(f, "datagram of {len} bytes is shorter than the {HEADER_LEN}-byte header")
            }
        }
    }
}

impl std::error::Error for FramingError {}

/// `true` if `name` can be carried in segment 1 as the destination file
/// name: non-empty, with no directory components, not `.` or `..`.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && Path::new(name).file_name() == Some(OsStr::new(name))
}
