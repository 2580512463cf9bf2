//! Test utilities & fixtures.
//! Mock collaborators share one ordered call log so tests can assert sequencing.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};

use glacier_logger::duty::events::{EventFlags, Pending};
use glacier_logger::duty::schedule::LoggingMode;
use glacier_logger::duty::{ControllerSettings, DutyCycleController, Peripherals};
use glacier_logger::errors::{RtcError, StorageError, TransportError};
use glacier_logger::hal::{AlarmMatch, Platform, Rtc, Storage, Transport, Watchdog};
use glacier_logger::metrics::SessionSummary;
use glacier_logger::pipeline::PipelineSettings;
use glacier_logger::ubx::encode;
use glacier_logger::ubx::time::GnssTime;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open(String),
    Write(String, usize),
    Flush(String),
    Close(String),
    Summary(String),
    SetTime(GnssTime),
    SetAlarm(NaiveDateTime, AlarmMatch),
    ClearPending,
    WatchdogArm,
    WatchdogPet,
    WatchdogStop,
    Power(bool),
    Restart,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

fn record(log: &CallLog, call: Call) {
    log.lock().unwrap().push(call);
}

pub fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

/// Frame of exactly `total` wire bytes.
pub fn frame_of_len(class: u8, id: u8, total: usize) -> Vec<u8> {
    let payload: Vec<u8> = (0..total - 8).map(|i| (i % 251) as u8).collect();
    encode(class, id, &payload)
}

pub fn data_frame(total: usize) -> Vec<u8> {
    frame_of_len(0x02, 0x15, total)
}

pub fn ack_frame(total: usize) -> Vec<u8> {
    frame_of_len(0x05, 0x01, total)
}

#[derive(Clone, Default)]
pub struct MockTransport {
    pub rx: Arc<Mutex<VecDeque<u8>>>,
    /// Set bit 15 on every reported count.
    pub sentinel: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn push(&self, bytes: &[u8]) {
        self.rx.lock().unwrap().extend(bytes.iter().copied());
    }
}

impl Transport for MockTransport {
    fn bytes_available(&mut self) -> Result<u16, TransportError> {
        let n = self.rx.lock().unwrap().len().min(0x7FFF) as u16;
        if self.sentinel.load(Ordering::SeqCst) {
            Ok(n | 0x8000)
        } else {
            Ok(n)
        }
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut rx = self.rx.lock().unwrap();
        let n = buf.len().min(rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = rx.pop_front().unwrap();
        }
        Ok(n)
    }
}

#[derive(Clone)]
pub struct MockStorage {
    pub log: CallLog,
    pub files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    pub summaries: Arc<Mutex<Vec<SessionSummary>>>,
    pub fail_open: Arc<AtomicBool>,
    pub fail_writes: Arc<AtomicBool>,
}

impl MockStorage {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            files: Arc::default(),
            summaries: Arc::default(),
            fail_open: Arc::default(),
            fail_writes: Arc::default(),
        }
    }

    pub fn file(&self, name: &str) -> Vec<u8> {
        self.files.lock().unwrap().get(name).cloned().unwrap_or_default()
    }

    pub fn write_sizes(&self) -> Vec<usize> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Call::Write(_, n) => Some(*n),
                _ => None,
            })
            .collect()
    }
}

impl Storage for MockStorage {
    type Handle = String;

    fn open(&mut self, name: &str) -> Result<String, StorageError> {
        record(&self.log, Call::Open(name.to_string()));
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(StorageError::Open {
                name: name.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "card missing"),
            });
        }
        self.files.lock().unwrap().entry(name.to_string()).or_default();
        Ok(name.to_string())
    }

    fn exists(&self, name: &str) -> bool {
        self.files.lock().unwrap().contains_key(name)
    }

    fn write(&mut self, handle: &mut String, bytes: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Write(std::io::Error::new(
                std::io::ErrorKind::Other,
                "card removed",
            )));
        }
        record(&self.log, Call::Write(handle.clone(), bytes.len()));
        self.files
            .lock()
            .unwrap()
            .entry(handle.clone())
            .or_default()
            .extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self, handle: &mut String) -> Result<(), StorageError> {
        record(&self.log, Call::Flush(handle.clone()));
        Ok(())
    }

    fn close(&mut self, handle: String) -> Result<(), StorageError> {
        record(&self.log, Call::Close(handle));
        Ok(())
    }

    fn record_summary(&mut self, summary: &SessionSummary) -> Result<(), StorageError> {
        record(&self.log, Call::Summary(summary.name.clone()));
        self.summaries.lock().unwrap().push(summary.clone());
        Ok(())
    }
}

/// RTC with a manually advanced clock.
#[derive(Clone)]
pub struct MockRtc {
    pub log: CallLog,
    pub clock: Arc<Mutex<NaiveDateTime>>,
}

impl MockRtc {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            clock: Arc::new(Mutex::new(t0())),
        }
    }

    pub fn advance(&self, d: chrono::Duration) {
        *self.clock.lock().unwrap() += d;
    }

    pub fn set_times(&self) -> Vec<GnssTime> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Call::SetTime(t) => Some(*t),
                _ => None,
            })
            .collect()
    }
}

impl Rtc for MockRtc {
    fn now(&self) -> NaiveDateTime {
        *self.clock.lock().unwrap()
    }

    fn set_time(&mut self, time: &GnssTime) -> Result<(), RtcError> {
        record(&self.log, Call::SetTime(*time));
        let t = time
            .to_datetime()
            .ok_or_else(|| RtcError::InvalidTime(time.to_string()))?;
        *self.clock.lock().unwrap() = t;
        Ok(())
    }

    fn set_alarm(&mut self, target: NaiveDateTime, mode: AlarmMatch) {
        record(&self.log, Call::SetAlarm(target, mode));
    }

    fn clear_pending_interrupt(&mut self) {
        record(&self.log, Call::ClearPending);
    }
}

#[derive(Clone)]
pub struct MockWatchdog {
    pub log: CallLog,
}

impl Watchdog for MockWatchdog {
    fn arm(&mut self, _timeout: Duration) {
        record(&self.log, Call::WatchdogArm);
    }

    fn pet(&mut self) {
        record(&self.log, Call::WatchdogPet);
    }

    fn stop(&mut self) {
        record(&self.log, Call::WatchdogStop);
    }
}

/// Platform whose clock advances only through `delay`.
#[derive(Clone)]
pub struct MockPlatform {
    pub log: CallLog,
    pub ms: Arc<AtomicU64>,
    pub low_voltage: Arc<AtomicBool>,
}

impl Platform for MockPlatform {
    fn millis(&self) -> u64 {
        self.ms.load(Ordering::SeqCst)
    }

    fn delay(&mut self, duration: Duration) {
        self.ms.fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn wait_for_event(&mut self, flags: &EventFlags, _timeout: Duration) -> Pending {
        flags.take()
    }

    fn set_peripheral_power(&mut self, on: bool) {
        record(&self.log, Call::Power(on));
    }

    fn low_voltage(&mut self) -> bool {
        self.low_voltage.load(Ordering::SeqCst)
    }

    fn hard_restart(&mut self) {
        record(&self.log, Call::Restart);
    }
}

pub type TestController =
    DutyCycleController<MockTransport, MockStorage, MockRtc, MockWatchdog, MockPlatform>;

/// Handles to the mocks a [`TestController`] owns.
pub struct Rig {
    pub log: CallLog,
    pub transport: MockTransport,
    pub storage: MockStorage,
    pub rtc: MockRtc,
    pub platform: MockPlatform,
    pub events: Arc<EventFlags>,
}

impl Rig {
    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.log.lock().unwrap().clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.log.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn position(&self, call: &Call) -> Option<usize> {
        self.log.lock().unwrap().iter().position(|c| c == call)
    }
}

pub fn settings(mode: LoggingMode) -> ControllerSettings {
    ControllerSettings {
        pipeline: PipelineSettings {
            staging_capacity: 8192,
            block_size: 512,
            flush_interval: Duration::from_millis(500),
            max_payload: 4096,
            read_chunk: 256,
            max_read_per_poll: 4096,
        },
        mode,
        poll_interval: Duration::from_millis(100),
        writer_tick: Duration::from_millis(100),
        watchdog_timeout: Duration::from_secs(4),
        max_interrupts: 10,
        dormant_wait: Duration::from_secs(1),
    }
}

pub fn rolling() -> LoggingMode {
    LoggingMode::Rolling {
        awake_minutes: 30,
        sleep_minutes: 90,
    }
}

pub fn rig(settings: ControllerSettings) -> (TestController, Rig) {
    let log: CallLog = Arc::default();
    let transport = MockTransport::default();
    let storage = MockStorage::new(log.clone());
    let rtc = MockRtc::new(log.clone());
    let platform = MockPlatform {
        log: log.clone(),
        ms: Arc::default(),
        low_voltage: Arc::default(),
    };
    let events = Arc::new(EventFlags::new());
    let hw = Peripherals {
        transport: transport.clone(),
        storage: storage.clone(),
        rtc: rtc.clone(),
        watchdog: MockWatchdog { log: log.clone() },
        platform: platform.clone(),
    };
    let controller = DutyCycleController::new(settings, hw, Arc::clone(&events));
    let rig = Rig {
        log,
        transport,
        storage,
        rtc,
        platform,
        events,
    };
    (controller, rig)
}
