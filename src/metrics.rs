//! Per-session counters and the session summary written to the journal.
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Counters for one Active window. Reset when a new session opens.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub bytes_read: u64,
    pub frames_valid: u64,
    pub frames_invalid: u64,
    pub noise_bytes: u64,
    pub acks_discarded: u64,
    pub naks_discarded: u64,
    pub bytes_staged: u64,
    pub overflow_bytes: u64,
    pub overflow_events: u64,
    pub staging_high_water: usize,
    pub blocks_written: u64,
    pub partial_writes: u64,
    pub bytes_written: u64,
    pub flushes: u64,
    pub storage_faults: u64,
    pub transport_faults: u64,
    pub sentinel_masked: u64,
    pub time_syncs: u64,
    pub time_sync_failures: u64,
    pub offline_discarded: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub name: String,
    pub started: NaiveDateTime,
    pub ended: NaiveDateTime,
    /// False once a storage fault took logging offline during the window.
    pub logging_online: bool,
    pub time_synced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtc_drift_ms: Option<i64>,
    pub watchdog_interrupts: u32,
    pub metrics: PipelineMetrics,
}

impl SessionSummary {
    pub fn duration_secs(&self) -> i64 {
        (self.ended - self.started).num_seconds()
    }

    /// One-line form for the log.
    pub fn brief(&self) -> String {
        format!(
            "{} {}s frames={} written={}B overflow={}B hwm={} faults(storage={} transport={}) synced={}",
            self.name,
            self.duration_secs(),
            self.metrics.frames_valid,
            self.metrics.bytes_written,
            self.metrics.overflow_bytes,
            self.metrics.staging_high_water,
            self.metrics.storage_faults,
            self.metrics.transport_faults,
            self.time_synced
        )
    }
}
