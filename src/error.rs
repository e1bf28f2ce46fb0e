//! # Error Types
//!
//! This module provides the error types used throughout the tsreplay library.
//! It defines a central error type `ReplayError` that encapsulates all of the
//! failure modes the file-replay engine can hit, from startup I/O failures to
//! the recoverable per-block anomalies the pacing loop logs and skips past.
//!
//! ## Example Usage
//!
//! ```rust
//! use tsreplay::error::{Result, ReplayError};
//!
//! fn require_ts(buf: &[u8]) -> Result<()> {
//!     if buf.is_empty() {
//!         return Err(ReplayError::BadFormat("empty buffer".to_string()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Primary error type for the tsreplay library.
///
/// Only the three startup failures (`OpenFailed`, `BadFormat`, `NoPcr`) and
/// `ShortRead` without `loop` set are ever returned across the engine/caller
/// boundary as an `Err`; the rest (`BadBlockTime`, `TimeTravel`,
/// `RingOverflow`, `NotifyFailed`) are recovered internally by the pacing
/// loop and only ever logged. The variants still exist on this enum so the
/// taxonomy is named in one place and so tests can assert on them directly.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// I/O errors that occur while opening, reading, or checkpointing a file
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The input file could not be opened at all
    #[error("failed to open {path}: {source}")]
    OpenFailed {
        /// Path that failed to open
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Neither TS188 nor M2TS192 framing could be detected in the initial buffer
    #[error("unrecognized packet geometry: {0}")]
    BadFormat(String),

    /// No PCR-bearing, non-random-access packet was found in the initial buffer
    #[error("no usable PCR found in initial buffer")]
    NoPcr,

    /// A refill returned fewer bytes than requested
    #[error("short read at offset {offset}: expected {expected} bytes, got {got}")]
    ShortRead {
        /// File offset the refill was attempted at
        offset: u64,
        /// Bytes requested
        expected: usize,
        /// Bytes actually read
        got: usize,
    },

    /// A computed block time fell outside the `[0, 250]` ms sanity window
    #[error("block time {block_time_ms:.2}ms out of range for {block_size} packets")]
    BadBlockTime {
        /// Computed block duration in milliseconds
        block_time_ms: f64,
        /// Number of packets in the offending block
        block_size: u64,
    },

    /// The monotonic wall clock observed a backward step
    #[error("monotonic clock went backwards")]
    TimeTravel,

    /// The handoff queue was full and a payload was dropped
    #[error("ring buffer overflow: {dropped} packet(s) dropped")]
    RingOverflow {
        /// Number of packets dropped since the last successful push
        dropped: u64,
    },

    /// The notification stream accepted fewer bytes than sent
    #[error("notify stream short write/read: {0}")]
    NotifyFailed(String),
}

/// A specialized Result type for tsreplay operations.
pub type Result<T> = std::result::Result<T, ReplayError>;
