//! Host (Linux/macOS) stand-ins for the board's RTC, watchdog and power controls.
//!
//! On the board, the RTC alarm and watchdog early warning are interrupt lines. Here an
//! async ticker task ([`run_ticker`]) plays that role: it samples [`SoftRtc`] and
//! [`SoftWatchdog`] and raises the shared [`EventFlags`].
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, Timelike, Utc};
use log::{debug, error, info};

use super::{AlarmMatch, Platform, Rtc, Watchdog};
use crate::duty::events::{EventFlags, Pending};
use crate::errors::RtcError;
use crate::ubx::time::GnssTime;

/// Exit status requesting a restart from the process supervisor (`EX_TEMPFAIL`).
pub const RESTART_EXIT_CODE: i32 = 75;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct RtcInner {
    offset: chrono::Duration,
    alarm: Option<(NaiveDateTime, AlarmMatch)>,
    pending: bool,
    last_fire: Option<NaiveDateTime>,
}

/// RTC over the system clock with a settable offset and one alarm slot.
#[derive(Debug, Clone)]
pub struct SoftRtc {
    inner: Arc<Mutex<RtcInner>>,
}

impl Default for SoftRtc {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftRtc {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RtcInner {
                offset: chrono::Duration::zero(),
                alarm: None,
                pending: false,
                last_fire: None,
            })),
        }
    }

    /// Alarm interrupt latched and not yet cleared.
    pub fn is_pending(&self) -> bool {
        lock(&self.inner).pending
    }

    pub fn alarm(&self) -> Option<(NaiveDateTime, AlarmMatch)> {
        lock(&self.inner).alarm
    }

    /// Sample the alarm at the current RTC time.
    pub fn tick(&self, flags: &EventFlags) -> bool {
        self.tick_at(self.now(), flags)
    }

    /// Sample the alarm at `now`. Fires at most once per matching second, and not while
    /// an earlier interrupt is still latched. Returns true when it fired.
    pub fn tick_at(&self, now: NaiveDateTime, flags: &EventFlags) -> bool {
        let second = now.with_nanosecond(0).unwrap_or(now);
        let mut rtc = lock(&self.inner);
        let Some((target, mode)) = rtc.alarm else {
            return false;
        };
        if rtc.pending || rtc.last_fire == Some(second) || !mode.matches(&second, &target) {
            return false;
        }
        rtc.pending = true;
        rtc.last_fire = Some(second);
        drop(rtc);
        flags.raise_alarm();
        true
    }
}

impl Rtc for SoftRtc {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc() + lock(&self.inner).offset
    }

    fn set_time(&mut self, time: &GnssTime) -> Result<(), RtcError> {
        let target = time
            .to_datetime()
            .ok_or_else(|| RtcError::InvalidTime(time.to_string()))?;
        lock(&self.inner).offset = target - Utc::now().naive_utc();
        Ok(())
    }

    fn set_alarm(&mut self, target: NaiveDateTime, mode: AlarmMatch) {
        let mut rtc = lock(&self.inner);
        rtc.alarm = Some((target, mode));
        rtc.last_fire = None;
    }

    fn clear_pending_interrupt(&mut self) {
        lock(&self.inner).pending = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogTick {
    Idle,
    /// Early-warning interrupt raised.
    Warned,
    /// Nobody serviced the warnings. Real hardware resets here.
    Starved,
}

#[derive(Debug)]
struct WatchdogInner {
    timeout: Option<Duration>,
    last_pet: Instant,
    warnings: u32,
}

/// Watchdog emulation. Raises one early warning per elapsed `timeout` without a pet and
/// reports starvation after `timeout * (max_interrupts + 2)`.
#[derive(Debug, Clone)]
pub struct SoftWatchdog {
    inner: Arc<Mutex<WatchdogInner>>,
    max_interrupts: u32,
}

impl SoftWatchdog {
    pub fn new(max_interrupts: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(WatchdogInner {
                timeout: None,
                last_pet: Instant::now(),
                warnings: 0,
            })),
            max_interrupts,
        }
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.inner).timeout.is_some()
    }

    pub fn tick(&self, now: Instant, flags: &EventFlags) -> WatchdogTick {
        let mut wd = lock(&self.inner);
        let Some(timeout) = wd.timeout else {
            return WatchdogTick::Idle;
        };
        let starved = now.saturating_duration_since(wd.last_pet);
        if starved >= timeout * (self.max_interrupts + 2) {
            return WatchdogTick::Starved;
        }
        if starved >= timeout * (wd.warnings + 1) {
            wd.warnings += 1;
            drop(wd);
            flags.raise_watchdog();
            return WatchdogTick::Warned;
        }
        WatchdogTick::Idle
    }
}

impl Watchdog for SoftWatchdog {
    fn arm(&mut self, timeout: Duration) {
        let mut wd = lock(&self.inner);
        wd.timeout = Some(timeout);
        wd.last_pet = Instant::now();
        wd.warnings = 0;
    }

    fn pet(&mut self) {
        let mut wd = lock(&self.inner);
        wd.last_pet = Instant::now();
        wd.warnings = 0;
    }

    fn stop(&mut self) {
        lock(&self.inner).timeout = None;
    }
}

pub struct HostPlatform {
    origin: Instant,
    poll: Duration,
    powered: bool,
}

impl HostPlatform {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            poll: Duration::from_millis(50),
            powered: false,
        }
    }

    pub fn powered(&self) -> bool {
        self.powered
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HostPlatform {
    fn millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn wait_for_event(&mut self, flags: &EventFlags, timeout: Duration) -> Pending {
        let deadline = Instant::now() + timeout;
        while !flags.any() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(self.poll.min(deadline - now));
        }
        flags.take()
    }

    fn set_peripheral_power(&mut self, on: bool) {
        if self.powered != on {
            debug!("Peripheral power {}", if on { "on" } else { "off" });
        }
        self.powered = on;
    }

    fn hard_restart(&mut self) {
        error!("Hard restart: exiting with status {}", RESTART_EXIT_CODE);
        log::logger().flush();
        std::process::exit(RESTART_EXIT_CODE);
    }
}

/// Interrupt emulation loop. Runs until `shutdown` is set.
pub async fn run_ticker(
    rtc: SoftRtc,
    watchdog: SoftWatchdog,
    flags: Arc<EventFlags>,
    period: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let mut interval = tokio::time::interval(period);
    info!("Interrupt ticker running every {:?}", period);
    while !shutdown.load(Ordering::Acquire) {
        interval.tick().await;
        if rtc.tick(&flags) {
            debug!("RTC alarm fired");
        }
        if watchdog.tick(Instant::now(), &flags) == WatchdogTick::Starved {
            error!("Main loop starved the watchdog");
            log::logger().flush();
            std::process::exit(RESTART_EXIT_CODE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn alarm_latches_until_cleared() {
        let flags = EventFlags::new();
        let mut rtc = SoftRtc::new();
        rtc.set_alarm(at(10, 5, 0), AlarmMatch::MinutesSeconds);
        assert!(!rtc.tick_at(at(10, 4, 59), &flags));
        assert!(rtc.tick_at(at(10, 5, 0), &flags));
        assert!(rtc.is_pending());
        assert!(!rtc.tick_at(at(10, 5, 0), &flags));
        rtc.clear_pending_interrupt();
        // Same second after clearing does not fire again.
        assert!(!rtc.tick_at(at(10, 5, 0), &flags));
        // MinutesSeconds matches again an hour later.
        assert!(rtc.tick_at(at(11, 5, 0), &flags));
        assert!(flags.take().alarm);
    }

    #[test]
    fn set_time_moves_clock() {
        let mut rtc = SoftRtc::new();
        let t = GnssTime {
            year: 2030,
            month: 1,
            day: 2,
            hour: 3,
            minute: 4,
            second: 5,
            nanos: 0,
        };
        rtc.set_time(&t).unwrap();
        let now = rtc.now();
        let target = t.to_datetime().unwrap();
        assert!((now - target).num_seconds().abs() <= 1);
    }

    #[test]
    fn watchdog_warns_then_starves() {
        let flags = EventFlags::new();
        let mut wd = SoftWatchdog::new(2);
        let start = Instant::now();
        assert_eq!(wd.tick(start, &flags), WatchdogTick::Idle);
        wd.arm(Duration::from_millis(100));
        let t0 = Instant::now();
        assert_eq!(wd.tick(t0 + Duration::from_millis(150), &flags), WatchdogTick::Warned);
        assert_eq!(wd.tick(t0 + Duration::from_millis(160), &flags), WatchdogTick::Idle);
        assert_eq!(wd.tick(t0 + Duration::from_millis(250), &flags), WatchdogTick::Warned);
        assert_eq!(flags.take().watchdog, 2);
        assert_eq!(wd.tick(t0 + Duration::from_millis(450), &flags), WatchdogTick::Starved);
        wd.stop();
        assert_eq!(wd.tick(t0 + Duration::from_secs(10), &flags), WatchdogTick::Idle);
    }

    #[test]
    fn wait_returns_raised_events() {
        let flags = EventFlags::new();
        let mut platform = HostPlatform::new();
        flags.raise_stop();
        let p = platform.wait_for_event(&flags, Duration::from_secs(5));
        assert!(p.stop);
        let p = platform.wait_for_event(&flags, Duration::from_millis(10));
        assert!(p.is_empty());
    }
}
