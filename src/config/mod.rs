//! # Configuration Management Module
//!
//! Logger settings live in one TOML file, loaded at startup and validated before the
//! controller is built.
//!
//! ## Configuration Structure
//!
//! - [`ReceiverConfig`] - GNSS receiver link and polling cadence
//! - [`PipelineConfig`] - staging, block and flush sizing
//! - [`LoggingMode`] - the `[schedule]` section, tagged by `mode`
//! - [`WatchdogConfig`] - watchdog timeout and restart threshold
//! - [`StorageConfig`] - where session files and the journal go
//! - [`LoggingConfig`] - diagnostic log level and file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use glacier_logger::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!     println!("Logging to {}", config.storage.data_dir);
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::fs;

pub use crate::duty::schedule::LoggingMode;
use crate::pipeline::staging::StagingBuffer;
use crate::pipeline::PipelineSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub receiver: ReceiverConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub schedule: LoggingMode,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Receiver navigation/measurement rate. The pipeline polls three times per interval.
    pub measurement_interval_ms: u64,
    /// Cap on bytes read in one poll.
    #[serde(default = "default_bytes_per_poll")]
    pub bytes_per_poll: usize,
}

fn default_bytes_per_poll() -> usize {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub staging_capacity: usize,
    pub block_size: usize,
    pub flush_interval_ms: u64,
    /// Transport poll cadence. Defaults to a third of `measurement_interval_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_ms: Option<u64>,
    /// Block writer pacing. At most one block is written per tick.
    #[serde(default = "default_writer_tick_ms")]
    pub writer_tick_ms: u64,
    pub max_payload_len: usize,
    /// Worst expected storage write stall, used to size the staging buffer.
    pub storage_latency_ms: u64,
}

fn default_writer_tick_ms() -> u64 {
    10
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            staging_capacity: 16 * 1024,
            block_size: 512,
            flush_interval_ms: 500,
            iteration_ms: None,
            writer_tick_ms: default_writer_tick_ms(),
            max_payload_len: crate::ubx::DEFAULT_MAX_PAYLOAD,
            storage_latency_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    pub timeout_ms: u64,
    /// Interrupts tolerated in one window before a hard restart.
    pub max_interrupts: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 4000,
            max_interrupts: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject settings the controller cannot run with, including a block writer that
    /// drains slower than the link delivers. Undersized staging is only warned about.
    pub fn validate(&self) -> Result<()> {
        if self.receiver.baud_rate == 0 {
            bail!("receiver.baud_rate must be non-zero");
        }
        if self.receiver.measurement_interval_ms == 0 {
            bail!("receiver.measurement_interval_ms must be non-zero");
        }
        if self.receiver.bytes_per_poll == 0 {
            bail!("receiver.bytes_per_poll must be non-zero");
        }
        let p = &self.pipeline;
        if p.block_size == 0 || p.staging_capacity == 0 {
            bail!("pipeline.block_size and pipeline.staging_capacity must be non-zero");
        }
        if p.staging_capacity < p.block_size {
            bail!(
                "pipeline.staging_capacity ({}) is smaller than one block ({})",
                p.staging_capacity,
                p.block_size
            );
        }
        if p.flush_interval_ms == 0 {
            bail!("pipeline.flush_interval_ms must be non-zero");
        }
        if p.writer_tick_ms == 0 {
            bail!("pipeline.writer_tick_ms must be non-zero");
        }
        if self.drain_rate() < self.line_rate() {
            bail!(
                "pipeline.block_size {} every {} ms drains {} B/s, below the {} B/s the receiver link can deliver at {} baud",
                p.block_size,
                p.writer_tick_ms,
                self.drain_rate(),
                self.line_rate(),
                self.receiver.baud_rate
            );
        }
        if p.max_payload_len == 0 || p.max_payload_len > u16::MAX as usize {
            bail!("pipeline.max_payload_len must be between 1 and 65535");
        }
        if self.watchdog.timeout_ms <= self.iteration_interval().as_millis() as u64 {
            bail!(
                "watchdog.timeout_ms ({}) must exceed the loop interval ({} ms)",
                self.watchdog.timeout_ms,
                self.iteration_interval().as_millis()
            );
        }
        self.schedule.validate().map_err(|e| anyhow!("schedule: {}", e))?;
        for msg in self.capacity_warning().into_iter().chain(self.poll_warning()) {
            warn!("{}", msg);
        }
        Ok(())
    }

    /// Warning text when staging cannot absorb a burst for the configured storage stall.
    pub fn capacity_warning(&self) -> Option<String> {
        let recommended = StagingBuffer::recommended_capacity(
            self.receiver.baud_rate,
            self.pipeline.storage_latency_ms,
        );
        (self.pipeline.staging_capacity < recommended).then(|| {
            format!(
                "pipeline.staging_capacity {} is below the recommended {} bytes for {} baud and {} ms storage latency",
                self.pipeline.staging_capacity,
                recommended,
                self.receiver.baud_rate,
                self.pipeline.storage_latency_ms
            )
        })
    }

    /// Warning text when one poll per interval cannot keep up with the link.
    pub fn poll_warning(&self) -> Option<String> {
        let interval_ms = self.iteration_interval().as_millis() as u64;
        let intake = self.receiver.bytes_per_poll as u64 * 1000 / interval_ms;
        (intake < self.line_rate()).then(|| {
            format!(
                "receiver.bytes_per_poll {} every {} ms reads {} B/s, below the {} B/s link rate",
                self.receiver.bytes_per_poll,
                interval_ms,
                intake,
                self.line_rate()
            )
        })
    }

    /// Bytes per second the receiver link can deliver. 10 bits per byte on the wire.
    pub fn line_rate(&self) -> u64 {
        (self.receiver.baud_rate / 10) as u64
    }

    /// Sustained bytes per second the block writer can hand to storage.
    pub fn drain_rate(&self) -> u64 {
        self.pipeline.block_size as u64 * 1000 / self.pipeline.writer_tick_ms.max(1)
    }

    pub fn writer_tick(&self) -> Duration {
        Duration::from_millis(self.pipeline.writer_tick_ms.max(1))
    }

    pub fn iteration_interval(&self) -> Duration {
        let ms = self
            .pipeline
            .iteration_ms
            .unwrap_or(self.receiver.measurement_interval_ms / 3);
        Duration::from_millis(ms.max(1))
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            staging_capacity: self.pipeline.staging_capacity,
            block_size: self.pipeline.block_size,
            flush_interval: Duration::from_millis(self.pipeline.flush_interval_ms),
            max_payload: self.pipeline.max_payload_len,
            read_chunk: self.pipeline.block_size.min(self.receiver.bytes_per_poll),
            max_read_per_poll: self.receiver.bytes_per_poll,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            receiver: ReceiverConfig {
                port: "/dev/ttyACM0".to_string(),
                baud_rate: 115200,
                measurement_interval_ms: 1000,
                bytes_per_poll: default_bytes_per_poll(),
            },
            pipeline: PipelineConfig::default(),
            schedule: LoggingMode::default(),
            watchdog: WatchdogConfig::default(),
            storage: StorageConfig {
                data_dir: "./data".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("glacier-logger.log".to_string()),
            },
        }
    }
}
