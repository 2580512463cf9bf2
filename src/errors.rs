//! Error types for the collaborator boundaries and the fault taxonomy used by the
//! duty-cycle controller.
//!
//! Collaborators return typed errors. The controller never lets them escape its loop:
//! each one is classified as a [`Fault`], counted, logged, and either absorbed or turned
//! into a state transition.
use thiserror::Error;

/// Errors raised by the receiver byte transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport reported bytes available but returned none.
    #[error("no data returned ({expected} bytes announced)")]
    NoData { expected: usize },

    /// The transport returned more bytes than were requested or announced.
    #[error("malformed length: requested {requested}, got {got}")]
    MalformedLength { requested: usize, got: usize },

    /// Wrapper around IO errors from the underlying link.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Link-specific failure (serial driver errors etc.).
    #[error("link error: {0}")]
    Link(String),
}

/// Errors raised by the block storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open {name}: {source}")]
    Open {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("flush failed: {0}")]
    Flush(#[source] std::io::Error),

    #[error("close failed: {0}")]
    Close(#[source] std::io::Error),

    /// Summary journal could not be serialized or appended.
    #[error("journal error: {0}")]
    Journal(String),
}

/// Errors raised by the real-time clock collaborator.
#[derive(Debug, Error)]
pub enum RtcError {
    #[error("invalid time {0}")]
    InvalidTime(String),
}

/// Reasons a time frame could not be used to set the RTC.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeSyncError {
    #[error("payload too short: {0} bytes")]
    ShortPayload(usize),

    #[error("receiver time not valid (flags 0x{0:02x})")]
    NotValid(u8),

    #[error("fields out of range: {0}")]
    OutOfRange(String),

    #[error("rtc rejected time: {0}")]
    Rejected(String),
}

/// Fault taxonomy. Every collaborator error maps onto exactly one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// No data, no acknowledgment, malformed length. Recoverable.
    TransportFault,
    /// Checksum, sync or length mismatch. Recoverable, parser resets.
    ParseDesync,
    /// Staging buffer full. Recoverable, bounded loss, counted.
    BufferOverflow,
    /// Open, write or flush failure. Logging goes offline for the window.
    StorageFault,
    /// Time frame unusable. Retried on the next qualifying frame.
    TimeSyncFailure,
    /// Too many watchdog interrupts. Fatal, hard restart.
    WatchdogExhaustion,
}

impl Fault {
    pub fn as_str(self) -> &'static str {
        match self {
            Fault::TransportFault => "transport",
            Fault::ParseDesync => "parse-desync",
            Fault::BufferOverflow => "buffer-overflow",
            Fault::StorageFault => "storage",
            Fault::TimeSyncFailure => "time-sync",
            Fault::WatchdogExhaustion => "watchdog-exhaustion",
        }
    }
}
