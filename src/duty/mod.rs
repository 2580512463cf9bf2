//! # Duty-Cycle Controller
//!
//! Owns the acquisition pipeline and the hardware collaborators, and decides when the
//! pipeline runs. The controller is a cooperative loop: each [`DutyCycleController::step`]
//! takes the pending interrupt events once, dispatches them, and (while Active) runs
//! one pipeline iteration: the transport is polled every `poll_interval`, the block
//! writer runs on every iteration, and iterations are paced by `writer_tick`.
//!
//! ```text
//!            boot                 alarm (low voltage: stay)
//!   ─────────────▶ Active ◀───────────────────── Dormant
//!                   │  │ ──── alarm ────────────────▶ ▲
//!                   │  └─ alarm (continuous): rotate file
//!                   │ stop                            │ stop
//!                   ▼                                 │
//!                 Halted ◀─────────────────────────────┘
//! ```
//!
//! A storage fault takes logging offline for the rest of the window; parsing continues.
//! Watchdog interrupts are counted and petted until `max_interrupts` is exceeded, which
//! ends in exactly one hard restart.

pub mod events;
pub mod schedule;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use log::{debug, error, info, warn};

use crate::config::Config;
use crate::errors::{Fault, StorageError};
use crate::hal::{Platform, Rtc, Storage, Transport, Watchdog};
use crate::metrics::{PipelineMetrics, SessionSummary};
use crate::pipeline::{Pipeline, PipelineSettings};

use events::EventFlags;
use schedule::{Alarm, LoggingMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DutyCycleState {
    Active,
    Dormant,
    /// Stopped by the external stop signal. Only [`DutyCycleController::resume`] leaves it.
    Halted,
}

/// Why [`DutyCycleController::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Halted,
    /// The platform was asked for a hard restart.
    Restart,
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub pipeline: PipelineSettings,
    pub mode: LoggingMode,
    /// Transport poll cadence, a third of the measurement interval by default.
    pub poll_interval: Duration,
    /// Pacing between Active iterations. One block write at most per tick, so this
    /// bounds sustained storage throughput at `block_size / writer_tick`.
    pub writer_tick: Duration,
    pub watchdog_timeout: Duration,
    pub max_interrupts: u32,
    /// Longest single low-power wait while Dormant.
    pub dormant_wait: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pipeline: config.pipeline_settings(),
            mode: config.schedule.clone(),
            poll_interval: config.iteration_interval(),
            writer_tick: config.writer_tick(),
            watchdog_timeout: Duration::from_millis(config.watchdog.timeout_ms),
            max_interrupts: config.watchdog.max_interrupts,
            dormant_wait: Duration::from_secs(1),
        }
    }
}

/// The hardware collaborators, owned by the controller.
pub struct Peripherals<T, S, R, W, P> {
    pub transport: T,
    pub storage: S,
    pub rtc: R,
    pub watchdog: W,
    pub platform: P,
}

struct OpenSession<H> {
    name: String,
    started: NaiveDateTime,
    /// `None` once logging went offline.
    handle: Option<H>,
    online: bool,
}

/// Deterministic session path from the window start time.
pub fn session_name(start: NaiveDateTime) -> String {
    start.format("%Y%m%d/%Y%m%d_%H%M%S.ubx").to_string()
}

/// Session path for the `seq`-th window started within the same second.
pub fn numbered_session_name(start: NaiveDateTime, seq: u32) -> String {
    if seq == 0 {
        return session_name(start);
    }
    format!("{}_{}.ubx", start.format("%Y%m%d/%Y%m%d_%H%M%S"), seq)
}

pub struct DutyCycleController<T, S: Storage, R, W, P> {
    settings: ControllerSettings,
    hw: Peripherals<T, S, R, W, P>,
    events: Arc<EventFlags>,
    pipeline: Pipeline,
    state: DutyCycleState,
    session: Option<OpenSession<S::Handle>>,
    watchdog_count: u32,
    last_poll_ms: Option<u64>,
    booted: bool,
    restarted: bool,
    history: Vec<SessionSummary>,
}

impl<T, S, R, W, P> DutyCycleController<T, S, R, W, P>
where
    T: Transport,
    S: Storage,
    R: Rtc,
    W: Watchdog,
    P: Platform,
{
    pub fn new(
        settings: ControllerSettings,
        hw: Peripherals<T, S, R, W, P>,
        events: Arc<EventFlags>,
    ) -> Self {
        let pipeline = Pipeline::new(&settings.pipeline);
        Self {
            settings,
            hw,
            events,
            pipeline,
            state: DutyCycleState::Dormant,
            session: None,
            watchdog_count: 0,
            last_poll_ms: None,
            booted: false,
            restarted: false,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> DutyCycleState {
        self.state
    }

    pub fn watchdog_count(&self) -> u32 {
        self.watchdog_count
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.pipeline.snapshot()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn peripherals(&self) -> &Peripherals<T, S, R, W, P> {
        &self.hw
    }

    pub fn peripherals_mut(&mut self) -> &mut Peripherals<T, S, R, W, P> {
        &mut self.hw
    }

    /// Name of the open session, if any.
    pub fn session_name(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.name.as_str())
    }

    /// False while a session is open but a storage fault took it offline.
    pub fn logging_online(&self) -> bool {
        self.session.as_ref().map_or(false, |s| s.handle.is_some())
    }

    /// Summaries of every session closed so far.
    pub fn history(&self) -> &[SessionSummary] {
        &self.history
    }

    /// Boot: the first window starts immediately so the RTC gets synchronized.
    pub fn start(&mut self) {
        if self.booted {
            return;
        }
        self.booted = true;
        info!("Duty cycle starting: {}", self.settings.mode.description());
        self.enter_active();
    }

    /// Leave `Halted` and open a new Active window.
    pub fn resume(&mut self) -> bool {
        if self.state != DutyCycleState::Halted {
            return false;
        }
        info!("Resuming from halt");
        self.enter_active();
        true
    }

    /// Step until the controller halts or restarts.
    pub fn run(&mut self) -> Shutdown {
        self.start();
        loop {
            if let Some(shutdown) = self.step() {
                return shutdown;
            }
        }
    }

    /// One main-loop iteration. Returns `Some` when the loop should end.
    pub fn step(&mut self) -> Option<Shutdown> {
        if self.restarted {
            return Some(Shutdown::Restart);
        }
        if !self.booted {
            self.start();
        }
        match self.state {
            DutyCycleState::Halted => Some(Shutdown::Halted),
            DutyCycleState::Active => {
                let pending = self.events.take();
                if self.on_watchdog(pending.watchdog) {
                    return Some(Shutdown::Restart);
                }
                if pending.stop {
                    info!("Stop requested, finalizing session");
                    self.halt();
                    return Some(Shutdown::Halted);
                }
                if pending.alarm {
                    if self.settings.mode.is_continuous() {
                        self.rotate();
                    } else {
                        self.enter_dormant();
                    }
                    return None;
                }
                self.iterate();
                None
            }
            DutyCycleState::Dormant => {
                let wait = self.settings.dormant_wait;
                let pending = self.hw.platform.wait_for_event(&self.events, wait);
                if pending.is_empty() {
                    return None;
                }
                if self.on_watchdog(pending.watchdog) {
                    return Some(Shutdown::Restart);
                }
                if pending.stop {
                    info!("Stop requested while dormant");
                    self.hw.rtc.clear_pending_interrupt();
                    self.state = DutyCycleState::Halted;
                    return Some(Shutdown::Halted);
                }
                if pending.alarm {
                    self.wake();
                }
                None
            }
        }
    }

    fn iterate(&mut self) {
        self.hw.watchdog.pet();
        let now_ms = self.hw.platform.millis();
        if self.poll_due(now_ms) {
            self.last_poll_ms = Some(now_ms);
            if let Err(e) = self.pipeline.poll(&mut self.hw.transport, &mut self.hw.rtc) {
                self.pipeline.record_transport_fault();
                warn!("{}: {}", Fault::TransportFault.as_str(), e);
            }
        }
        let now_ms = self.hw.platform.millis();
        let result = match self.session.as_mut().and_then(|s| s.handle.as_mut()) {
            Some(handle) => self
                .pipeline
                .service_storage(&mut self.hw.storage, handle, now_ms),
            None => {
                self.pipeline.discard_staged();
                Ok(Default::default())
            }
        };
        match result {
            Ok(report) if report.flushed => debug!(
                "Flushed (partial {:?}, staged {})",
                report.partial_bytes,
                self.pipeline.staging().available()
            ),
            Ok(_) => {}
            Err(e) => self.go_offline(e),
        }
        self.hw.platform.delay(self.settings.writer_tick);
    }

    fn poll_due(&self, now_ms: u64) -> bool {
        let interval = self.settings.poll_interval.as_millis() as u64;
        self.last_poll_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= interval)
    }

    /// Returns true when the restart threshold was crossed.
    fn on_watchdog(&mut self, interrupts: u32) -> bool {
        for _ in 0..interrupts {
            self.watchdog_count += 1;
            if self.watchdog_count > self.settings.max_interrupts {
                error!(
                    "{}: {} interrupts, restarting",
                    Fault::WatchdogExhaustion.as_str(),
                    self.watchdog_count
                );
                self.restarted = true;
                self.hw.platform.hard_restart();
                return true;
            }
            warn!(
                "Watchdog interrupt {}/{}",
                self.watchdog_count, self.settings.max_interrupts
            );
            if self.state == DutyCycleState::Active {
                self.hw.watchdog.pet();
            }
        }
        false
    }

    fn arm(&mut self, alarm: Alarm) {
        self.hw.rtc.clear_pending_interrupt();
        self.events.clear_alarm();
        self.hw.rtc.set_alarm(alarm.target, alarm.mode);
        debug!("Alarm set for {} ({:?})", alarm.target, alarm.mode);
    }

    fn enter_active(&mut self) {
        self.watchdog_count = 0;
        let now = self.hw.rtc.now();
        // Armed first so the window still ends if anything below misbehaves.
        self.arm(self.settings.mode.end_of_active(now));
        self.hw.platform.set_peripheral_power(true);
        self.hw.watchdog.arm(self.settings.watchdog_timeout);
        self.open_session(now);
        self.state = DutyCycleState::Active;
    }

    fn open_session(&mut self, now: NaiveDateTime) {
        self.pipeline.begin_session(self.hw.platform.millis());
        self.last_poll_ms = None;
        let name = self.unique_session_name(now);
        let handle = match self.hw.storage.open(&name) {
            Ok(h) => {
                info!("Session {} opened", name);
                Some(h)
            }
            Err(e) => {
                self.pipeline.record_storage_fault();
                error!("{}: {}; logging offline", Fault::StorageFault.as_str(), e);
                None
            }
        };
        self.session = Some(OpenSession {
            name,
            started: now,
            online: handle.is_some(),
            handle,
        });
    }

    /// Never reuse a finished session's file, even when a window restarts within the
    /// same RTC second.
    fn unique_session_name(&self, now: NaiveDateTime) -> String {
        let mut seq = 0;
        loop {
            let name = numbered_session_name(now, seq);
            let reused = self.history.iter().any(|s| s.name == name);
            if !reused && !self.hw.storage.exists(&name) {
                return name;
            }
            seq += 1;
        }
    }

    fn go_offline(&mut self, err: StorageError) {
        self.pipeline.record_storage_fault();
        error!(
            "{}: {}; logging offline for this window",
            Fault::StorageFault.as_str(),
            err
        );
        let handle = self.session.as_mut().and_then(|s| {
            s.online = false;
            s.handle.take()
        });
        if let Some(h) = handle {
            if let Err(e) = self.hw.storage.close(h) {
                debug!("Close after fault failed: {}", e);
            }
        }
        self.pipeline.discard_staged();
    }

    /// Final flush, close and journal entry for the open session.
    fn close_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        match session.handle.take() {
            Some(mut handle) => {
                let now_ms = self.hw.platform.millis();
                let closed = self
                    .pipeline
                    .finish(&mut self.hw.storage, &mut handle, now_ms)
                    .and_then(|_| self.hw.storage.close(handle));
                if let Err(e) = closed {
                    self.pipeline.record_storage_fault();
                    session.online = false;
                    error!(
                        "{}: {} while closing {}",
                        Fault::StorageFault.as_str(),
                        e,
                        session.name
                    );
                }
            }
            None => {
                self.pipeline.discard_staged();
            }
        }
        let time = self.pipeline.time();
        let synced = !time.sync_required();
        let summary = SessionSummary {
            name: session.name,
            started: session.started,
            ended: self.hw.rtc.now(),
            logging_online: session.online,
            time_synced: synced,
            rtc_drift_ms: if synced { time.last_drift_ms() } else { None },
            watchdog_interrupts: self.watchdog_count,
            metrics: self.pipeline.snapshot(),
        };
        if let Err(e) = self.hw.storage.record_summary(&summary) {
            warn!("Could not record session summary: {}", e);
        }
        info!("Session closed: {}", summary.brief());
        self.history.push(summary);
    }

    fn power_down(&mut self) {
        self.hw.platform.set_peripheral_power(false);
        self.hw.watchdog.stop();
    }

    fn enter_dormant(&mut self) {
        info!("Logging window over");
        self.close_session();
        self.power_down();
        let now = self.hw.rtc.now();
        self.arm(self.settings.mode.next_active(now));
        self.watchdog_count = 0;
        self.state = DutyCycleState::Dormant;
    }

    fn rotate(&mut self) {
        info!("Rotating session file");
        self.close_session();
        self.watchdog_count = 0;
        let now = self.hw.rtc.now();
        self.arm(self.settings.mode.end_of_active(now));
        self.open_session(now);
    }

    fn wake(&mut self) {
        if self.hw.platform.low_voltage() {
            warn!("Low voltage at wake-up, skipping this window");
            let now = self.hw.rtc.now();
            self.arm(self.settings.mode.next_active(now));
            return;
        }
        info!("Alarm: starting logging window");
        self.enter_active();
    }

    fn halt(&mut self) {
        self.close_session();
        self.power_down();
        self.hw.rtc.clear_pending_interrupt();
        self.events.clear_alarm();
        self.state = DutyCycleState::Halted;
    }
}
