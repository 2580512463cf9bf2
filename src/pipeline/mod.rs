//! # Acquisition Pipeline
//!
//! Transport bytes flow through three stages on every Active iteration:
//!
//! ```text
//! Transport ──▶ FrameParser ──▶ StagingBuffer ──▶ BlockWriter ──▶ Storage
//!                    │
//!                    └──▶ TimeExtractor ──▶ Rtc   (NAV-TIMEUTC only)
//! ```
//!
//! Acknowledgment frames are counted and dropped after parsing. Everything else is
//! staged byte-for-byte, so a session file is the receiver stream minus ACK/NAK.

pub mod staging;
pub mod writer;

use std::time::Duration;

use log::{debug, trace, warn};

use crate::errors::{Fault, StorageError, TransportError};
use crate::hal::{Rtc, Storage, Transport, AVAILABLE_MASK, AVAILABLE_SENTINEL};
use crate::logutil::hex_snippet;
use crate::metrics::PipelineMetrics;
use crate::ubx::parser::{Feed, FrameParser};
use crate::ubx::time::{SyncOutcome, TimeExtractor};
use crate::ubx::{Frame, FrameKind, DEFAULT_MAX_PAYLOAD};

use staging::StagingBuffer;
use writer::{BlockWriter, WriteReport};

/// Sizing knobs for one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub staging_capacity: usize,
    pub block_size: usize,
    pub flush_interval: Duration,
    pub max_payload: usize,
    /// Bytes requested per transport read.
    pub read_chunk: usize,
    /// Cap on bytes pulled in one poll, bounding the iteration time slice.
    pub max_read_per_poll: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            staging_capacity: 16 * 1024,
            block_size: 512,
            flush_interval: Duration::from_millis(500),
            max_payload: DEFAULT_MAX_PAYLOAD,
            read_chunk: 256,
            max_read_per_poll: 4096,
        }
    }
}

pub struct Pipeline {
    parser: FrameParser,
    staging: StagingBuffer,
    writer: BlockWriter,
    time: TimeExtractor,
    metrics: PipelineMetrics,
    read_buf: Vec<u8>,
    max_payload: usize,
    max_read_per_poll: usize,
}

impl Pipeline {
    pub fn new(settings: &PipelineSettings) -> Self {
        Self {
            parser: FrameParser::with_max_payload(settings.max_payload),
            staging: StagingBuffer::new(settings.staging_capacity),
            writer: BlockWriter::new(settings.block_size, settings.flush_interval),
            time: TimeExtractor::new(),
            metrics: PipelineMetrics::default(),
            read_buf: vec![0u8; settings.read_chunk.max(1)],
            max_payload: settings.max_payload,
            max_read_per_poll: settings.max_read_per_poll.max(1),
        }
    }

    /// Reset all per-session state and arm the RTC sync.
    pub fn begin_session(&mut self, now_ms: u64) {
        self.parser = FrameParser::with_max_payload(self.max_payload);
        self.staging.clear();
        self.staging.reset_high_water();
        self.writer.reset(now_ms);
        self.metrics = PipelineMetrics::default();
        self.time.request_sync();
    }

    pub fn staging(&self) -> &StagingBuffer {
        &self.staging
    }

    pub fn writer(&self) -> &BlockWriter {
        &self.writer
    }

    pub fn time(&self) -> &TimeExtractor {
        &self.time
    }

    /// Pull what the receiver has buffered and run it through the parser.
    /// Returns the number of bytes read.
    pub fn poll<T: Transport, R: Rtc>(
        &mut self,
        transport: &mut T,
        rtc: &mut R,
    ) -> Result<usize, TransportError> {
        let raw = transport.bytes_available()?;
        if raw & AVAILABLE_SENTINEL != 0 {
            self.metrics.sentinel_masked += 1;
            debug!("Masked sentinel bit in byte count 0x{:04x}", raw);
        }
        let mut remaining = ((raw & AVAILABLE_MASK) as usize).min(self.max_read_per_poll);
        let mut total = 0;
        let mut buf = std::mem::take(&mut self.read_buf);
        let result = loop {
            if remaining == 0 {
                break Ok(total);
            }
            let want = remaining.min(buf.len());
            let n = match transport.read_bytes(&mut buf[..want]) {
                Ok(n) => n,
                Err(e) => break Err(e),
            };
            if n == 0 {
                break Err(TransportError::NoData {
                    expected: remaining,
                });
            }
            if n > want {
                break Err(TransportError::MalformedLength {
                    requested: want,
                    got: n,
                });
            }
            trace!("RX {} bytes: {}", n, hex_snippet(&buf[..n], 16));
            self.ingest(&buf[..n], rtc);
            remaining -= n;
            total += n;
        };
        self.read_buf = buf;
        result
    }

    /// Feed raw bytes through the parser and route completed frames.
    pub fn ingest<R: Rtc>(&mut self, bytes: &[u8], rtc: &mut R) {
        self.metrics.bytes_read += bytes.len() as u64;
        for &b in bytes {
            match self.parser.feed(b) {
                Feed::Incomplete => {}
                Feed::FrameReady(frame) => {
                    self.route(frame, rtc);
                }
                Feed::Invalid(reason) => {
                    self.metrics.frames_invalid += 1;
                    debug!("{}: {:?}", Fault::ParseDesync.as_str(), reason);
                }
            }
        }
    }

    /// Apply the classification policy to one verified frame.
    pub fn route<R: Rtc>(&mut self, frame: Frame, rtc: &mut R) -> FrameKind {
        self.metrics.frames_valid += 1;
        let kind = frame.kind();
        match kind {
            FrameKind::Ack => {
                self.metrics.acks_discarded += 1;
                trace!("Discarded {} ({} bytes)", frame.name(), frame.len());
            }
            FrameKind::Nak => {
                self.metrics.naks_discarded += 1;
                warn!(
                    "Receiver NAK for {}",
                    hex_snippet(frame.payload(), frame.payload_len())
                );
            }
            FrameKind::Time | FrameKind::Data => {
                self.stage(frame.as_bytes());
                if kind == FrameKind::Time {
                    match self.time.on_frame(&frame, rtc) {
                        SyncOutcome::Synced { .. } => self.metrics.time_syncs += 1,
                        SyncOutcome::Failed(e) => {
                            self.metrics.time_sync_failures += 1;
                            trace!("{}: {}", Fault::TimeSyncFailure.as_str(), e);
                        }
                        SyncOutcome::Idle => {}
                    }
                }
            }
        }
        kind
    }

    fn stage(&mut self, bytes: &[u8]) {
        let accepted = self.staging.append(bytes);
        self.metrics.bytes_staged += accepted as u64;
        if accepted < bytes.len() {
            let lost = (bytes.len() - accepted) as u64;
            self.metrics.overflow_bytes += lost;
            self.metrics.overflow_events += 1;
            if self.metrics.overflow_events % 100 == 1 {
                warn!(
                    "{}: dropped {} bytes ({} events, {} bytes total)",
                    Fault::BufferOverflow.as_str(),
                    lost,
                    self.metrics.overflow_events,
                    self.metrics.overflow_bytes
                );
            }
        }
    }

    pub fn service_storage<S: Storage>(
        &mut self,
        storage: &mut S,
        handle: &mut S::Handle,
        now_ms: u64,
    ) -> Result<WriteReport, StorageError> {
        self.writer
            .service(&mut self.staging, storage, handle, now_ms)
    }

    pub fn finish<S: Storage>(
        &mut self,
        storage: &mut S,
        handle: &mut S::Handle,
        now_ms: u64,
    ) -> Result<WriteReport, StorageError> {
        self.writer
            .finish(&mut self.staging, storage, handle, now_ms)
    }

    /// Drop staged bytes while logging is offline so the parser keeps running.
    pub fn discard_staged(&mut self) -> usize {
        let n = self.staging.clear() + self.writer.discard();
        self.metrics.offline_discarded += n as u64;
        n
    }

    pub fn record_storage_fault(&mut self) {
        self.metrics.storage_faults += 1;
    }

    pub fn record_transport_fault(&mut self) {
        self.metrics.transport_faults += 1;
    }

    /// Current counters, including writer, parser and staging figures.
    pub fn snapshot(&self) -> PipelineMetrics {
        let w = self.writer.stats();
        PipelineMetrics {
            noise_bytes: self.parser.noise_bytes(),
            staging_high_water: self.staging.high_water(),
            blocks_written: w.blocks_written,
            partial_writes: w.partial_writes,
            bytes_written: w.bytes_written,
            flushes: w.flushes,
            ..self.metrics.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RtcError;
    use crate::hal::AlarmMatch;
    use crate::ubx::encode;
    use crate::ubx::time::GnssTime;
    use chrono::NaiveDateTime;
    use std::collections::VecDeque;

    struct NullRtc;

    impl Rtc for NullRtc {
        fn now(&self) -> NaiveDateTime {
            NaiveDateTime::default()
        }
        fn set_time(&mut self, _time: &GnssTime) -> Result<(), RtcError> {
            Ok(())
        }
        fn set_alarm(&mut self, _target: NaiveDateTime, _mode: AlarmMatch) {}
        fn clear_pending_interrupt(&mut self) {}
    }

    struct Scripted {
        available: u16,
        data: VecDeque<u8>,
    }

    impl Transport for Scripted {
        fn bytes_available(&mut self) -> Result<u16, TransportError> {
            Ok(self.available)
        }
        fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            let n = buf.len().min(self.data.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.data.pop_front().unwrap_or_default();
            }
            Ok(n)
        }
    }

    #[test]
    fn sentinel_bit_is_masked() {
        let wire = encode(0x02, 0x15, &[1, 2, 3, 4]);
        let mut t = Scripted {
            available: AVAILABLE_SENTINEL | wire.len() as u16,
            data: wire.iter().copied().collect(),
        };
        let mut p = Pipeline::new(&PipelineSettings::default());
        p.begin_session(0);
        let n = p.poll(&mut t, &mut NullRtc).unwrap();
        assert_eq!(n, wire.len());
        let m = p.snapshot();
        assert_eq!(m.sentinel_masked, 1);
        assert_eq!(m.frames_valid, 1);
        assert_eq!(p.staging().available(), wire.len());
    }

    #[test]
    fn empty_read_is_transport_fault() {
        let mut t = Scripted {
            available: 10,
            data: VecDeque::new(),
        };
        let mut p = Pipeline::new(&PipelineSettings::default());
        assert!(matches!(
            p.poll(&mut t, &mut NullRtc),
            Err(TransportError::NoData { expected: 10 })
        ));
    }

    #[test]
    fn overflow_is_counted() {
        let settings = PipelineSettings {
            staging_capacity: 20,
            ..Default::default()
        };
        let mut p = Pipeline::new(&settings);
        p.begin_session(0);
        let wire = encode(0x02, 0x15, &[0u8; 16]);
        p.ingest(&wire, &mut NullRtc);
        let m = p.snapshot();
        assert_eq!(m.bytes_staged, 20);
        assert_eq!(m.overflow_bytes, (wire.len() - 20) as u64);
        assert_eq!(m.overflow_events, 1);
    }
}
