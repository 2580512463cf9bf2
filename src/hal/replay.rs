//! Transport that replays a captured byte stream, a fixed number of bytes per poll.
use std::path::Path;

use super::Transport;
use crate::errors::TransportError;

pub struct ReplayTransport {
    data: Vec<u8>,
    pos: usize,
    bytes_per_poll: usize,
}

impl ReplayTransport {
    pub fn new(data: Vec<u8>, bytes_per_poll: usize) -> Self {
        Self {
            data,
            pos: 0,
            bytes_per_poll: bytes_per_poll.clamp(1, super::AVAILABLE_MASK as usize),
        }
    }

    pub fn from_file(path: impl AsRef<Path>, bytes_per_poll: usize) -> Result<Self, TransportError> {
        let data = std::fs::read(path)?;
        Ok(Self::new(data, bytes_per_poll))
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

impl Transport for ReplayTransport {
    fn bytes_available(&mut self) -> Result<u16, TransportError> {
        Ok(self.remaining().min(self.bytes_per_poll) as u16)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
