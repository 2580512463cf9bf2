//! # Hardware Collaborators
//!
//! The acquisition pipeline and the duty-cycle controller only talk to hardware through
//! the traits in this module:
//!
//! - [`Transport`] - byte link to the GNSS receiver
//! - [`Storage`] - append-only block storage (SD card, filesystem)
//! - [`Rtc`] - real-time clock with one alarm slot and a latched interrupt
//! - [`Watchdog`] - hardware watchdog with an early-warning interrupt
//! - [`Platform`] - power switching, low-power wait, monotonic time, hard restart
//!
//! Host implementations live in the submodules and are wired by the binary. Tests
//! provide their own mocks.

pub mod file_storage;
pub mod host;
pub mod replay;
#[cfg(feature = "serial")]
pub mod serial;

use std::time::Duration;

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::duty::events::{EventFlags, Pending};
use crate::errors::{RtcError, StorageError, TransportError};
use crate::metrics::SessionSummary;
use crate::ubx::time::GnssTime;

/// Bit 15 of a reported byte count is a known-bad sentinel on u-blox DDC links.
pub const AVAILABLE_SENTINEL: u16 = 0x8000;
pub const AVAILABLE_MASK: u16 = 0x7FFF;

/// Byte link to the receiver. Both calls are synchronous.
pub trait Transport {
    /// Bytes waiting in the receiver. The caller masks [`AVAILABLE_SENTINEL`].
    fn bytes_available(&mut self) -> Result<u16, TransportError>;

    /// Read up to `buf.len()` bytes, returning how many were written.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn bytes_available(&mut self) -> Result<u16, TransportError> {
        (**self).bytes_available()
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read_bytes(buf)
    }
}

/// Append-only block storage.
pub trait Storage {
    type Handle;

    fn open(&mut self, name: &str) -> Result<Self::Handle, StorageError>;

    /// Whether `name` already holds data from an earlier session.
    fn exists(&self, _name: &str) -> bool {
        false
    }

    fn write(&mut self, handle: &mut Self::Handle, bytes: &[u8]) -> Result<(), StorageError>;

    /// Durable once it returns.
    fn flush(&mut self, handle: &mut Self::Handle) -> Result<(), StorageError>;

    fn close(&mut self, handle: Self::Handle) -> Result<(), StorageError>;

    /// Persist a per-session summary. Storages without a journal ignore it.
    fn record_summary(&mut self, _summary: &SessionSummary) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Which time fields must match for the RTC alarm to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmMatch {
    Seconds,
    MinutesSeconds,
    HoursMinutesSeconds,
    DayHoursMinutesSeconds,
    MonthDayHoursMinutesSeconds,
    Full,
}

impl AlarmMatch {
    /// Field comparison at one-second resolution.
    pub fn matches(self, now: &NaiveDateTime, target: &NaiveDateTime) -> bool {
        let ss = now.second() == target.second();
        let mm = ss && now.minute() == target.minute();
        let hh = mm && now.hour() == target.hour();
        let dd = hh && now.day() == target.day();
        let mo = dd && now.month() == target.month();
        match self {
            AlarmMatch::Seconds => ss,
            AlarmMatch::MinutesSeconds => mm,
            AlarmMatch::HoursMinutesSeconds => hh,
            AlarmMatch::DayHoursMinutesSeconds => dd,
            AlarmMatch::MonthDayHoursMinutesSeconds => mo,
            AlarmMatch::Full => mo && now.year() == target.year(),
        }
    }
}

/// Real-time clock.
pub trait Rtc {
    fn now(&self) -> NaiveDateTime;

    fn set_time(&mut self, time: &GnssTime) -> Result<(), RtcError>;

    /// Program the single alarm slot. Callers clear the latched interrupt first.
    fn set_alarm(&mut self, target: NaiveDateTime, mode: AlarmMatch);

    fn clear_pending_interrupt(&mut self);
}

pub trait Watchdog {
    fn arm(&mut self, timeout: Duration);
    fn pet(&mut self);
    fn stop(&mut self);
}

/// Board-level services that are not one of the data collaborators.
pub trait Platform {
    /// Monotonic milliseconds since an arbitrary origin.
    fn millis(&self) -> u64;

    /// Pace the Active loop between writer invocations.
    fn delay(&mut self, duration: Duration);

    /// Low-power wait until an interrupt raises an event or `timeout` passes.
    /// Returns the events taken from `flags`, possibly empty.
    fn wait_for_event(&mut self, flags: &EventFlags, timeout: Duration) -> Pending;

    /// Switch receiver and storage power.
    fn set_peripheral_power(&mut self, on: bool);

    /// Supply below the logging threshold.
    fn low_voltage(&mut self) -> bool {
        false
    }

    /// Unconditional restart of the whole system. Hardware never returns from this.
    fn hard_restart(&mut self);
}
