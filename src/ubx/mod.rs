//! # UBX Protocol Module
//!
//! Byte-level handling of the u-blox UBX binary protocol spoken by the GNSS receiver.
//!
//! A UBX frame on the wire is:
//!
//! ```text
//! 0xB5 0x62 <class> <id> <len_lo> <len_hi> <payload ...> <ck_a> <ck_b>
//! ```
//!
//! The checksum is an 8-bit Fletcher sum over class, id, the two length bytes and the
//! payload. [`parser::FrameParser`] turns an untrusted byte stream into checksum-valid
//! [`Frame`]s; [`time::TimeExtractor`] consumes the `NAV-TIMEUTC` side channel.
//!
//! ```rust
//! use glacier_logger::ubx::{self, parser::FrameParser};
//!
//! let wire = ubx::encode(0x02, 0x15, &[1, 2, 3]);
//! let frames = FrameParser::new().push(&wire);
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].payload(), &[1, 2, 3]);
//! ```

pub mod parser;
pub mod time;

pub const SYNC_1: u8 = 0xB5;
pub const SYNC_2: u8 = 0x62;

/// Sync bytes + class + id + 2 length bytes.
pub const HEADER_LEN: usize = 6;
/// Header plus the two checksum bytes.
pub const FRAME_OVERHEAD: usize = HEADER_LEN + 2;

/// Upper bound for a single payload unless configured otherwise.
pub const DEFAULT_MAX_PAYLOAD: usize = 4096;

pub const CLASS_NAV: u8 = 0x01;
pub const CLASS_RXM: u8 = 0x02;
pub const CLASS_ACK: u8 = 0x05;

pub const ID_ACK_NAK: u8 = 0x00;
pub const ID_ACK_ACK: u8 = 0x01;
pub const ID_NAV_TIMEUTC: u8 = 0x21;

/// One complete, checksum-verified UBX frame.
///
/// Holds the exact wire bytes so the frame can be staged byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Only the parser builds frames, after the checksum has been verified.
    pub(crate) fn from_verified(bytes: Vec<u8>) -> Self {
        debug_assert!(bytes.len() >= FRAME_OVERHEAD);
        Self { bytes }
    }

    pub fn class(&self) -> u8 {
        self.bytes[2]
    }

    pub fn id(&self) -> u8 {
        self.bytes[3]
    }

    pub fn payload_len(&self) -> usize {
        u16::from_le_bytes([self.bytes[4], self.bytes[5]]) as usize
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..HEADER_LEN + self.payload_len()]
    }

    pub fn checksum(&self) -> (u8, u8) {
        let n = self.bytes.len();
        (self.bytes[n - 2], self.bytes[n - 1])
    }

    /// The full frame as it appeared on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn kind(&self) -> FrameKind {
        FrameKind::classify(self.class(), self.id())
    }

    /// `CLASS-ID` style name, falling back to hex for unknown messages.
    pub fn name(&self) -> String {
        message_name(self.class(), self.id())
    }
}

/// Routing classification applied to every emitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Ack,
    Nak,
    /// The designated absolute-time frame. Staged and passed to the time extractor.
    Time,
    Data,
}

impl FrameKind {
    pub fn classify(class: u8, id: u8) -> Self {
        match (class, id) {
            (CLASS_ACK, ID_ACK_ACK) => FrameKind::Ack,
            (CLASS_ACK, ID_ACK_NAK) => FrameKind::Nak,
            // Any other ACK-class message is still an acknowledgment artifact.
            (CLASS_ACK, _) => FrameKind::Ack,
            (CLASS_NAV, ID_NAV_TIMEUTC) => FrameKind::Time,
            _ => FrameKind::Data,
        }
    }

    /// Acknowledgment frames are never part of the logged stream.
    pub fn is_staged(self) -> bool {
        matches!(self, FrameKind::Time | FrameKind::Data)
    }
}

/// Fletcher-8 checksum as used by UBX, over class..payload.
pub fn checksum(data: &[u8]) -> (u8, u8) {
    let mut ck_a: u8 = 0;
    let mut ck_b: u8 = 0;
    for &b in data {
        ck_a = ck_a.wrapping_add(b);
        ck_b = ck_b.wrapping_add(ck_a);
    }
    (ck_a, ck_b)
}

/// Build a wire frame for `class`/`id` carrying `payload`.
///
/// # Panics
///
/// Panics if `payload` is longer than `u16::MAX` bytes.
pub fn encode(class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let len = u16::try_from(payload.len()).expect("UBX payload exceeds u16 length");
    let mut out = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    out.extend_from_slice(&[SYNC_1, SYNC_2, class, id]);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    let (ck_a, ck_b) = checksum(&out[2..]);
    out.push(ck_a);
    out.push(ck_b);
    out
}

pub fn class_name(class: u8) -> Option<&'static str> {
    Some(match class {
        0x01 => "NAV",
        0x02 => "RXM",
        0x04 => "INF",
        0x05 => "ACK",
        0x06 => "CFG",
        0x09 => "UPD",
        0x0A => "MON",
        0x0D => "TIM",
        0x10 => "ESF",
        0x13 => "MGA",
        0x21 => "LOG",
        0x27 => "SEC",
        0x28 => "HNR",
        _ => return None,
    })
}

/// Human-readable message name for diagnostics (`RXM-RAWX`, `ACK-NAK`, `0x7f-0x01`).
pub fn message_name(class: u8, id: u8) -> String {
    let known = match (class, id) {
        (0x01, 0x07) => Some("NAV-PVT"),
        (0x01, 0x21) => Some("NAV-TIMEUTC"),
        (0x01, 0x35) => Some("NAV-SAT"),
        (0x02, 0x13) => Some("RXM-SFRBX"),
        (0x02, 0x15) => Some("RXM-RAWX"),
        (0x05, 0x00) => Some("ACK-NAK"),
        (0x05, 0x01) => Some("ACK-ACK"),
        (0x0A, 0x04) => Some("MON-VER"),
        (0x0A, 0x09) => Some("MON-HW"),
        _ => None,
    };
    match (known, class_name(class)) {
        (Some(name), _) => name.to_string(),
        (None, Some(cls)) => format!("{}-0x{:02x}", cls, id),
        (None, None) => format!("0x{:02x}-0x{:02x}", class, id),
    }
}
