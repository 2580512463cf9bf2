//! Logging schedules and RTC alarm computation.
//!
//! Every transition programs exactly one alarm. [`LoggingMode::end_of_active`] gives the
//! alarm that closes the current Active window (or rotates the file in continuous
//! mode); [`LoggingMode::next_active`] gives the wake-up alarm armed before going Dormant.
//! Targets are whole seconds, matching the RTC's resolution.

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::hal::AlarmMatch;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum LoggingMode {
    /// Active for `awake_minutes`, then Dormant for `sleep_minutes`, forever.
    Rolling { awake_minutes: u32, sleep_minutes: u32 },
    /// One window per UTC day starting at `start_hour:00:00`.
    Daily { start_hour: u8, awake_hours: u32 },
    /// Never Dormant. The session file is rotated every `rollover_hours`.
    Continuous { rollover_hours: u32 },
}

impl Default for LoggingMode {
    fn default() -> Self {
        LoggingMode::Rolling {
            awake_minutes: 60,
            sleep_minutes: 120,
        }
    }
}

/// One programmed alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alarm {
    pub target: NaiveDateTime,
    pub mode: AlarmMatch,
}

impl Alarm {
    /// Alarm `interval` after `now`, with the coarsest match that still identifies it.
    pub fn after(now: NaiveDateTime, interval: Duration) -> Self {
        Alarm {
            target: whole_second(now) + interval,
            mode: granularity(interval),
        }
    }
}

/// Match mode for a relative alarm `interval` ahead.
pub fn granularity(interval: Duration) -> AlarmMatch {
    if interval < Duration::hours(1) {
        AlarmMatch::MinutesSeconds
    } else if interval < Duration::days(1) {
        AlarmMatch::HoursMinutesSeconds
    } else if interval < Duration::days(28) {
        AlarmMatch::DayHoursMinutesSeconds
    } else {
        AlarmMatch::Full
    }
}

fn whole_second(t: NaiveDateTime) -> NaiveDateTime {
    t.with_nanosecond(0).unwrap_or(t)
}

impl LoggingMode {
    pub fn is_continuous(&self) -> bool {
        matches!(self, LoggingMode::Continuous { .. })
    }

    pub fn description(&self) -> String {
        match self {
            LoggingMode::Rolling {
                awake_minutes,
                sleep_minutes,
            } => format!("rolling {}m on / {}m off", awake_minutes, sleep_minutes),
            LoggingMode::Daily {
                start_hour,
                awake_hours,
            } => format!("daily from {:02}:00 UTC for {}h", start_hour, awake_hours),
            LoggingMode::Continuous { rollover_hours } => {
                format!("continuous, new file every {}h", rollover_hours)
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match *self {
            LoggingMode::Rolling {
                awake_minutes,
                sleep_minutes,
            } => {
                if awake_minutes == 0 || sleep_minutes == 0 {
                    return Err("rolling awake_minutes and sleep_minutes must be non-zero".into());
                }
            }
            LoggingMode::Daily {
                start_hour,
                awake_hours,
            } => {
                if start_hour > 23 {
                    return Err(format!("daily start_hour {} is not an hour of day", start_hour));
                }
                if awake_hours == 0 || awake_hours >= 24 {
                    return Err("daily awake_hours must be between 1 and 23".into());
                }
            }
            LoggingMode::Continuous { rollover_hours } => {
                if rollover_hours == 0 {
                    return Err("continuous rollover_hours must be non-zero".into());
                }
            }
        }
        Ok(())
    }

    /// Alarm that ends the Active window opened at `now`.
    pub fn end_of_active(&self, now: NaiveDateTime) -> Alarm {
        match *self {
            LoggingMode::Rolling { awake_minutes, .. } => {
                Alarm::after(now, Duration::minutes(awake_minutes as i64))
            }
            LoggingMode::Daily {
                start_hour,
                awake_hours,
            } => {
                let awake = Duration::hours(awake_hours as i64);
                let start = last_daily_start(now, start_hour);
                let end = start + awake;
                if now < end {
                    Alarm {
                        target: end,
                        mode: AlarmMatch::HoursMinutesSeconds,
                    }
                } else {
                    // Woken outside the daily window (boot, resume): log one full window.
                    Alarm::after(now, awake)
                }
            }
            LoggingMode::Continuous { rollover_hours } => {
                Alarm::after(now, Duration::hours(rollover_hours as i64))
            }
        }
    }

    /// Wake-up alarm armed when going Dormant at `now`.
    pub fn next_active(&self, now: NaiveDateTime) -> Alarm {
        match *self {
            LoggingMode::Rolling { sleep_minutes, .. } => {
                Alarm::after(now, Duration::minutes(sleep_minutes as i64))
            }
            LoggingMode::Daily { start_hour, .. } => Alarm {
                target: last_daily_start(now, start_hour) + Duration::days(1),
                mode: AlarmMatch::HoursMinutesSeconds,
            },
            LoggingMode::Continuous { rollover_hours } => {
                Alarm::after(now, Duration::hours(rollover_hours as i64))
            }
        }
    }
}

/// Most recent `start_hour:00:00` at or before `now`.
fn last_daily_start(now: NaiveDateTime, start_hour: u8) -> NaiveDateTime {
    let time = NaiveTime::from_hms_opt(start_hour as u32 % 24, 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date().and_time(time);
    if today <= now {
        today
    } else {
        today - Duration::days(1)
    }
}
