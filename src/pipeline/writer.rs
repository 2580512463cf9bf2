//! Fixed-size block assembly and the periodic durability flush.
//!
//! Each call to [`BlockWriter::service`] moves staged bytes into an assembly buffer of
//! exactly `block_size` bytes and issues at most one full-block write. Independently,
//! once `flush_interval` has elapsed since the last flush, any partial block is written
//! and the storage is synced, so data never sits in RAM for longer than the interval.
use std::time::Duration;

use log::{debug, trace};

use super::staging::StagingBuffer;
use crate::errors::StorageError;
use crate::hal::Storage;

/// What a single service call did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    pub full_blocks: usize,
    /// Size of the partial block written ahead of a flush, if any.
    pub partial_bytes: Option<usize>,
    pub flushed: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriterStats {
    pub blocks_written: u64,
    pub partial_writes: u64,
    pub bytes_written: u64,
    pub flushes: u64,
}

pub struct BlockWriter {
    block: Vec<u8>,
    block_size: usize,
    flush_interval_ms: u64,
    last_flush_ms: u64,
    stats: WriterStats,
}

impl BlockWriter {
    /// # Panics
    ///
    /// Panics if `block_size` is zero.
    pub fn new(block_size: usize, flush_interval: Duration) -> Self {
        assert!(block_size > 0, "block size must be non-zero");
        Self {
            block: Vec::with_capacity(block_size),
            block_size,
            flush_interval_ms: flush_interval.as_millis() as u64,
            last_flush_ms: 0,
            stats: WriterStats::default(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Bytes in the assembly buffer not yet handed to storage.
    pub fn buffered(&self) -> usize {
        self.block.len()
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Start a fresh session: drop the assembly buffer and restart the flush timer.
    pub fn reset(&mut self, now_ms: u64) {
        self.block.clear();
        self.last_flush_ms = now_ms;
        self.stats = WriterStats::default();
    }

    /// Drop the assembly buffer without writing it. Returns the bytes dropped.
    pub fn discard(&mut self) -> usize {
        let n = self.block.len();
        self.block.clear();
        n
    }

    pub fn flush_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_flush_ms) >= self.flush_interval_ms
    }

    /// One pipeline iteration worth of work.
    pub fn service<S: Storage>(
        &mut self,
        staging: &mut StagingBuffer,
        storage: &mut S,
        handle: &mut S::Handle,
        now_ms: u64,
    ) -> Result<WriteReport, StorageError> {
        let mut report = WriteReport::default();
        let need = self.block_size - self.block.len();
        staging.drain_into(&mut self.block, need);
        if self.block.len() == self.block_size {
            self.write_block(storage, handle)?;
            report.full_blocks = 1;
        }
        if self.flush_due(now_ms) {
            let flushed = self.flush(storage, handle, now_ms)?;
            report.partial_bytes = flushed.partial_bytes;
            report.flushed = true;
        }
        Ok(report)
    }

    /// Write any partial block, then sync storage.
    pub fn flush<S: Storage>(
        &mut self,
        storage: &mut S,
        handle: &mut S::Handle,
        now_ms: u64,
    ) -> Result<WriteReport, StorageError> {
        let mut report = WriteReport::default();
        if !self.block.is_empty() {
            let n = self.block.len();
            storage.write(handle, &self.block)?;
            self.block.clear();
            self.stats.partial_writes += 1;
            self.stats.bytes_written += n as u64;
            report.partial_bytes = Some(n);
            trace!("Partial block of {} bytes written", n);
        }
        storage.flush(handle)?;
        self.stats.flushes += 1;
        self.last_flush_ms = now_ms;
        report.flushed = true;
        Ok(report)
    }

    /// Session end: write everything still staged, then flush.
    pub fn finish<S: Storage>(
        &mut self,
        staging: &mut StagingBuffer,
        storage: &mut S,
        handle: &mut S::Handle,
        now_ms: u64,
    ) -> Result<WriteReport, StorageError> {
        let mut full_blocks = 0;
        loop {
            let need = self.block_size - self.block.len();
            staging.drain_into(&mut self.block, need);
            if self.block.len() < self.block_size {
                break;
            }
            self.write_block(storage, handle)?;
            full_blocks += 1;
        }
        let mut report = self.flush(storage, handle, now_ms)?;
        report.full_blocks = full_blocks;
        debug!(
            "Final flush: {} full blocks, partial {:?}",
            full_blocks, report.partial_bytes
        );
        Ok(report)
    }

    fn write_block<S: Storage>(
        &mut self,
        storage: &mut S,
        handle: &mut S::Handle,
    ) -> Result<(), StorageError> {
        storage.write(handle, &self.block)?;
        self.stats.blocks_written += 1;
        self.stats.bytes_written += self.block.len() as u64;
        self.block.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct VecStorage {
        writes: Vec<usize>,
        flushes: usize,
    }

    impl Storage for VecStorage {
        type Handle = Vec<u8>;

        fn open(&mut self, _name: &str) -> Result<Vec<u8>, StorageError> {
            Ok(Vec::new())
        }

        fn write(&mut self, handle: &mut Vec<u8>, bytes: &[u8]) -> Result<(), StorageError> {
            self.writes.push(bytes.len());
            handle.extend_from_slice(bytes);
            Ok(())
        }

        fn flush(&mut self, _handle: &mut Vec<u8>) -> Result<(), StorageError> {
            self.flushes += 1;
            Ok(())
        }

        fn close(&mut self, _handle: Vec<u8>) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn at_most_one_block_per_service() {
        let mut staging = StagingBuffer::new(4096);
        staging.append(&[7u8; 300]);
        let mut storage = VecStorage::default();
        let mut file = Vec::new();
        let mut w = BlockWriter::new(100, Duration::from_millis(500));
        w.reset(0);

        let r = w.service(&mut staging, &mut storage, &mut file, 10).unwrap();
        assert_eq!(r.full_blocks, 1);
        assert!(!r.flushed);
        assert_eq!(staging.available(), 200);

        w.service(&mut staging, &mut storage, &mut file, 20).unwrap();
        w.service(&mut staging, &mut storage, &mut file, 30).unwrap();
        assert_eq!(storage.writes, vec![100, 100, 100]);
        assert_eq!(storage.flushes, 0);
    }

    #[test]
    fn finish_drains_all_and_flushes_once() {
        let mut staging = StagingBuffer::new(4096);
        staging.append(&[1u8; 250]);
        let mut storage = VecStorage::default();
        let mut file = Vec::new();
        let mut w = BlockWriter::new(100, Duration::from_millis(500));
        w.reset(0);

        let r = w.finish(&mut staging, &mut storage, &mut file, 5).unwrap();
        assert_eq!(r.full_blocks, 2);
        assert_eq!(r.partial_bytes, Some(50));
        assert_eq!(storage.writes, vec![100, 100, 50]);
        assert_eq!(storage.flushes, 1);
        assert_eq!(file.len(), 250);
        assert_eq!(w.stats().bytes_written, 250);
    }
}
