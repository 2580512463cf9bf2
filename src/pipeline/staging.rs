//! Bounded FIFO byte buffer between the frame parser and the block writer.
//!
//! Capacity is fixed at construction. When full, `append` takes what fits and reports
//! the shortfall; the excess is lost and the caller accounts for it. There is no
//! backpressure: the receiver cannot be throttled once bytes are available.

/// Fixed-capacity byte ring.
pub struct StagingBuffer {
    buf: Box<[u8]>,
    head: usize,
    len: usize,
    high_water: usize,
}

impl StagingBuffer {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "staging buffer capacity must be non-zero");
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
            high_water: 0,
        }
    }

    /// Smallest capacity that absorbs a burst at `baud_rate` for `latency_ms` of
    /// storage stall, doubled for margin. 10 bits per byte on the wire.
    pub fn recommended_capacity(baud_rate: u32, latency_ms: u64) -> usize {
        let bytes_per_sec = (baud_rate / 10) as u64;
        let burst = (bytes_per_sec * latency_ms).div_ceil(1000);
        (burst * 2) as usize
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes waiting to be drained.
    pub fn available(&self) -> usize {
        self.len
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Highest fill level seen since construction or the last [`reset_high_water`](Self::reset_high_water).
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn reset_high_water(&mut self) {
        self.high_water = self.len;
    }

    /// Append as many bytes as fit. Returns the number accepted.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let cap = self.capacity();
        let take = bytes.len().min(cap - self.len);
        let tail = (self.head + self.len) % cap;
        let first = take.min(cap - tail);
        self.buf[tail..tail + first].copy_from_slice(&bytes[..first]);
        self.buf[..take - first].copy_from_slice(&bytes[first..take]);
        self.len += take;
        self.high_water = self.high_water.max(self.len);
        take
    }

    /// Remove and return up to `max` bytes in FIFO order.
    pub fn drain(&mut self, max: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(max.min(self.len));
        self.drain_into(&mut out, max);
        out
    }

    /// Move up to `max` bytes onto the end of `out`. Returns how many moved.
    pub fn drain_into(&mut self, out: &mut Vec<u8>, max: usize) -> usize {
        let cap = self.capacity();
        let take = max.min(self.len);
        let first = take.min(cap - self.head);
        out.extend_from_slice(&self.buf[self.head..self.head + first]);
        out.extend_from_slice(&self.buf[..take - first]);
        self.head = (self.head + take) % cap;
        self.len -= take;
        take
    }

    /// Discard everything staged. Returns the number of bytes dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.len;
        self.head = 0;
        self.len = 0;
        dropped
    }
}
