//! Incremental byte-at-a-time UBX frame parser.
//!
//! The receiver link cannot be rewound, so the parser never asks for bytes again: a
//! byte that does not fit the current stage discards the partial frame and the cursor
//! returns to the first sync byte. Bytes outside any frame are skipped and counted.
use super::{checksum, Frame, DEFAULT_MAX_PAYLOAD, HEADER_LEN, SYNC_1, SYNC_2};

/// Cursor position inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Sync1,
    Sync2,
    Class,
    Id,
    LenLo,
    LenHi,
    Payload,
    CkA,
    CkB,
}

/// Why a partial frame was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Desync {
    /// Second byte after `0xB5` was not `0x62`.
    BadSync(u8),
    /// Header announced a payload above the configured maximum.
    Oversize(usize),
    /// Received checksum did not match the computed one.
    Checksum { expected: (u8, u8), got: (u8, u8) },
}

/// Outcome of feeding one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    Incomplete,
    FrameReady(Frame),
    Invalid(Desync),
}

#[derive(Debug)]
pub struct FrameParser {
    stage: Stage,
    buf: Vec<u8>,
    remaining: usize,
    ck_a: u8,
    max_payload: usize,
    noise_bytes: u64,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            stage: Stage::Sync1,
            buf: Vec::with_capacity(HEADER_LEN + 256),
            remaining: 0,
            ck_a: 0,
            max_payload,
            noise_bytes: 0,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Bytes held for the in-progress frame.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Bytes skipped while hunting for a sync byte since construction.
    pub fn noise_bytes(&self) -> u64 {
        self.noise_bytes
    }

    /// Drop any in-progress frame and return to the first sync stage.
    pub fn reset(&mut self) {
        self.stage = Stage::Sync1;
        self.buf.clear();
        self.remaining = 0;
        self.ck_a = 0;
    }

    fn desync(&mut self, reason: Desync) -> Feed {
        self.reset();
        Feed::Invalid(reason)
    }

    pub fn feed(&mut self, byte: u8) -> Feed {
        match self.stage {
            Stage::Sync1 => {
                if byte == SYNC_1 {
                    self.buf.clear();
                    self.buf.push(byte);
                    self.stage = Stage::Sync2;
                } else {
                    self.noise_bytes += 1;
                }
                Feed::Incomplete
            }
            Stage::Sync2 => {
                if byte != SYNC_2 {
                    return self.desync(Desync::BadSync(byte));
                }
                self.buf.push(byte);
                self.stage = Stage::Class;
                Feed::Incomplete
            }
            Stage::Class => {
                self.buf.push(byte);
                self.stage = Stage::Id;
                Feed::Incomplete
            }
            Stage::Id => {
                self.buf.push(byte);
                self.stage = Stage::LenLo;
                Feed::Incomplete
            }
            Stage::LenLo => {
                self.buf.push(byte);
                self.stage = Stage::LenHi;
                Feed::Incomplete
            }
            Stage::LenHi => {
                self.buf.push(byte);
                let len = u16::from_le_bytes([self.buf[4], self.buf[5]]) as usize;
                if len > self.max_payload {
                    return self.desync(Desync::Oversize(len));
                }
                self.buf.reserve(len + 2);
                self.remaining = len;
                self.stage = if len == 0 { Stage::CkA } else { Stage::Payload };
                Feed::Incomplete
            }
            Stage::Payload => {
                self.buf.push(byte);
                self.remaining -= 1;
                if self.remaining == 0 {
                    self.stage = Stage::CkA;
                }
                Feed::Incomplete
            }
            Stage::CkA => {
                // Compared together with ck_b so a corrupted frame always ends on its last byte.
                self.ck_a = byte;
                self.stage = Stage::CkB;
                Feed::Incomplete
            }
            Stage::CkB => {
                let expected = checksum(&self.buf[2..]);
                let got = (self.ck_a, byte);
                if expected != got {
                    return self.desync(Desync::Checksum { expected, got });
                }
                let mut bytes = std::mem::take(&mut self.buf);
                bytes.push(got.0);
                bytes.push(got.1);
                self.reset();
                Feed::FrameReady(Frame::from_verified(bytes))
            }
        }
    }

    /// Feed a chunk, returning every frame it completes. Desyncs are dropped silently;
    /// use [`feed`](Self::feed) when they need to be counted.
    pub fn push(&mut self, data: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &b in data {
            if let Feed::FrameReady(frame) = self.feed(b) {
                frames.push(frame);
            }
        }
        frames
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}
