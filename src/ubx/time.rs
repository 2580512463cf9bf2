//! RTC synchronization from `NAV-TIMEUTC` frames.
//!
//! The extractor is armed with [`TimeExtractor::request_sync`] on every entry into an
//! Active window. While armed, every time frame is checked; the first one carrying a
//! valid UTC solution sets the RTC exactly once and disarms it. Frames that fail
//! validation are simply skipped, the next one gets a chance.
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info, warn};

use super::{Frame, FrameKind};
use crate::errors::TimeSyncError;
use crate::hal::Rtc;

pub const TIMEUTC_LEN: usize = 20;
/// `valid` flag bit: UTC time of day and date are resolved.
pub const VALID_UTC: u8 = 0x04;

/// Calendar time decoded from the receiver, as handed to the RTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GnssTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Sub-second fraction in nanoseconds, never negative.
    pub nanos: u32,
}

impl GnssTime {
    /// Decode a `NAV-TIMEUTC` payload.
    pub fn from_timeutc(payload: &[u8]) -> Result<Self, TimeSyncError> {
        if payload.len() < TIMEUTC_LEN {
            return Err(TimeSyncError::ShortPayload(payload.len()));
        }
        let valid = payload[19];
        if valid & VALID_UTC == 0 {
            return Err(TimeSyncError::NotValid(valid));
        }
        let nano = i32::from_le_bytes([payload[8], payload[9], payload[10], payload[11]]);
        // Negative offsets near a second boundary are clamped toward zero, not rounded.
        let nanos = if nano < 0 { 0 } else { nano as u32 };
        let time = GnssTime {
            year: u16::from_le_bytes([payload[12], payload[13]]),
            month: payload[14],
            day: payload[15],
            hour: payload[16],
            minute: payload[17],
            second: payload[18],
            nanos,
        };
        time.to_datetime()
            .map(|_| time)
            .ok_or_else(|| TimeSyncError::OutOfRange(time.to_string()))
    }

    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?
            .and_hms_nano_opt(
                self.hour as u32,
                self.minute as u32,
                self.second as u32,
                self.nanos,
            )
    }
}

impl std::fmt::Display for GnssTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}Z",
            self.year, self.month, self.day, self.hour, self.minute, self.second, self.nanos
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No sync pending, or the frame is not a time frame.
    Idle,
    /// RTC was set. `drift_ms` is RTC minus receiver time before the set.
    Synced { time: GnssTime, drift_ms: i64 },
    Failed(TimeSyncError),
}

#[derive(Debug, Default)]
pub struct TimeExtractor {
    sync_required: bool,
    last_sync: Option<GnssTime>,
    last_drift_ms: Option<i64>,
    failures: u32,
}

impl TimeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_sync(&mut self) {
        self.sync_required = true;
    }

    pub fn sync_required(&self) -> bool {
        self.sync_required
    }

    pub fn last_sync(&self) -> Option<GnssTime> {
        self.last_sync
    }

    pub fn last_drift_ms(&self) -> Option<i64> {
        self.last_drift_ms
    }

    /// Failed attempts since construction.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn on_frame<R: Rtc>(&mut self, frame: &Frame, rtc: &mut R) -> SyncOutcome {
        if !self.sync_required || frame.kind() != FrameKind::Time {
            return SyncOutcome::Idle;
        }
        let time = match GnssTime::from_timeutc(frame.payload()) {
            Ok(t) => t,
            Err(e) => {
                self.failures += 1;
                debug!("Time frame rejected: {}", e);
                return SyncOutcome::Failed(e);
            }
        };
        let drift_ms = time
            .to_datetime()
            .map(|gnss| (rtc.now() - gnss).num_milliseconds())
            .unwrap_or_default();
        if let Err(e) = rtc.set_time(&time) {
            self.failures += 1;
            warn!("RTC rejected receiver time {}: {}", time, e);
            return SyncOutcome::Failed(TimeSyncError::Rejected(e.to_string()));
        }
        self.sync_required = false;
        self.last_sync = Some(time);
        self.last_drift_ms = Some(drift_ms);
        info!("RTC synchronized to {} (drift {} ms)", time, drift_ms);
        SyncOutcome::Synced { time, drift_ms }
    }
}

/// Build a `NAV-TIMEUTC` payload. Used by tests and replay fixtures.
pub fn timeutc_payload(time: &GnssTime, nano: i32, valid: u8) -> [u8; TIMEUTC_LEN] {
    let mut p = [0u8; TIMEUTC_LEN];
    p[4..8].copy_from_slice(&50u32.to_le_bytes());
    p[8..12].copy_from_slice(&nano.to_le_bytes());
    p[12..14].copy_from_slice(&time.year.to_le_bytes());
    p[14] = time.month;
    p[15] = time.day;
    p[16] = time.hour;
    p[17] = time.minute;
    p[18] = time.second;
    p[19] = valid;
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GnssTime {
        GnssTime {
            year: 2024,
            month: 5,
            day: 17,
            hour: 23,
            minute: 59,
            second: 59,
            nanos: 0,
        }
    }

    #[test]
    fn decodes_valid_payload() {
        let p = timeutc_payload(&sample(), 250_000_000, 0x07);
        let t = GnssTime::from_timeutc(&p).unwrap();
        assert_eq!(t.year, 2024);
        assert_eq!(t.second, 59);
        assert_eq!(t.nanos, 250_000_000);
    }

    #[test]
    fn negative_fraction_clamps_to_zero() {
        let p = timeutc_payload(&sample(), -2, VALID_UTC);
        assert_eq!(GnssTime::from_timeutc(&p).unwrap().nanos, 0);
    }

    #[test]
    fn rejects_invalid_flag_and_dates() {
        let p = timeutc_payload(&sample(), 0, 0x03);
        assert_eq!(GnssTime::from_timeutc(&p), Err(TimeSyncError::NotValid(0x03)));

        let mut bad = sample();
        bad.month = 13;
        let p = timeutc_payload(&bad, 0, VALID_UTC);
        assert!(matches!(
            GnssTime::from_timeutc(&p),
            Err(TimeSyncError::OutOfRange(_))
        ));

        assert_eq!(
            GnssTime::from_timeutc(&[0u8; 8]),
            Err(TimeSyncError::ShortPayload(8))
        );
    }
}
