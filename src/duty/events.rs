//! Interrupt-to-main-loop event flags.
//!
//! Interrupt sources (the RTC alarm line, the watchdog early warning, a stop button or
//! ctrl-c) only call the `raise_*` methods. The main loop takes a snapshot once per
//! iteration with [`EventFlags::take`].
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct EventFlags {
    alarm: AtomicBool,
    stop: AtomicBool,
    watchdog: AtomicU32,
}

/// Events observed by one [`EventFlags::take`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub alarm: bool,
    pub stop: bool,
    /// Watchdog interrupts since the last take.
    pub watchdog: u32,
}

impl Pending {
    pub fn is_empty(&self) -> bool {
        !self.alarm && !self.stop && self.watchdog == 0
    }
}

impl EventFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise_alarm(&self) {
        self.alarm.store(true, Ordering::Release);
    }

    pub fn raise_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn raise_watchdog(&self) {
        self.watchdog.fetch_add(1, Ordering::AcqRel);
    }

    pub fn clear_alarm(&self) {
        self.alarm.store(false, Ordering::Release);
    }

    pub fn any(&self) -> bool {
        self.alarm.load(Ordering::Acquire)
            || self.stop.load(Ordering::Acquire)
            || self.watchdog.load(Ordering::Acquire) > 0
    }

    /// Atomically consume everything raised so far.
    pub fn take(&self) -> Pending {
        Pending {
            alarm: self.alarm.swap(false, Ordering::AcqRel),
            stop: self.stop.swap(false, Ordering::AcqRel),
            watchdog: self.watchdog.swap(0, Ordering::AcqRel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn take_consumes_once() {
        let flags = EventFlags::new();
        flags.raise_alarm();
        flags.raise_watchdog();
        flags.raise_watchdog();
        assert!(flags.any());
        let p = flags.take();
        assert!(p.alarm && !p.stop);
        assert_eq!(p.watchdog, 2);
        assert!(flags.take().is_empty());
    }

    #[test]
    fn raised_from_other_threads() {
        let flags = Arc::new(EventFlags::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let f = Arc::clone(&flags);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        f.raise_watchdog();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(flags.take().watchdog, 100);
    }
}
