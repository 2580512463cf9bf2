//! # Glacier Logger - Unattended GNSS Raw Data Logger
//!
//! Glacier Logger captures the binary UBX stream of a u-blox receiver to block storage on a
//! duty cycle, for long unattended deployments where power is scarce and nobody is around to
//! press reset.
//!
//! ## Features
//!
//! - **Frame Validation**: Byte-at-a-time UBX parser that resynchronizes on noise and drops
//!   checksum failures without losing neighbouring frames.
//! - **Lossless Staging**: Bounded staging buffer sized from baud rate and storage latency,
//!   with counted overflow instead of unbounded growth.
//! - **Block Storage**: Fixed-size block writes plus a periodic durability flush.
//! - **RTC Sync**: The RTC is set from `NAV-TIMEUTC` once per logging window.
//! - **Duty Cycle**: Rolling, daily or continuous schedules driven by RTC alarms.
//! - **Self Recovery**: Watchdog supervision ending in a hard restart when the loop stalls.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use glacier_logger::config::Config;
//! use glacier_logger::duty::events::EventFlags;
//! use glacier_logger::duty::{ControllerSettings, DutyCycleController, Peripherals};
//! use glacier_logger::hal::file_storage::FileStorage;
//! use glacier_logger::hal::host::{HostPlatform, SoftRtc, SoftWatchdog};
//! use glacier_logger::hal::replay::ReplayTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let hw = Peripherals {
//!         transport: ReplayTransport::from_file("capture.ubx", 512)?,
//!         storage: FileStorage::new(&config.storage.data_dir),
//!         rtc: SoftRtc::new(),
//!         watchdog: SoftWatchdog::new(config.watchdog.max_interrupts),
//!         platform: HostPlatform::new(),
//!     };
//!     let events = Arc::new(EventFlags::new());
//!     let mut controller =
//!         DutyCycleController::new(ControllerSettings::from_config(&config), hw, events);
//!     controller.run();
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`ubx`] - UBX frame model, parser and `NAV-TIMEUTC` time extraction
//! - [`pipeline`] - staging buffer, block writer and the per-iteration pipeline
//! - [`duty`] - duty-cycle state machine, schedules and interrupt event flags
//! - [`hal`] - collaborator traits and host implementations
//! - [`config`] - configuration management and validation
//! - [`metrics`] - per-session counters and journal summaries
//! - [`errors`] - collaborator errors and the fault taxonomy
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  DutyCycle      │ ← RTC alarms, watchdog, stop signal
//! │  Controller     │
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Pipeline      │ ← parse, filter, stage, write
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   HAL           │ ← transport, storage, RTC, watchdog, platform
//! └─────────────────┘
//! ```

pub mod config;
pub mod duty;
pub mod errors;
pub mod hal;
pub mod logutil;
pub mod metrics;
pub mod pipeline;
pub mod ubx;
