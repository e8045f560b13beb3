//! Error handling for the procmon engine
//!
//! This module provides error types for all engine operations, including
//! sample validation, record integrity, the durable store, and the
//! platform metrics collaborators.

use std::io;

use thiserror::Error;

/// The main error type for the procmon engine
#[derive(Error, Debug)]
pub enum StatsError {
    /// A submitted sample violates a metric invariant
    #[error("Invalid sample: {0}")]
    Sample(#[from] SampleError),

    /// Persisted record state failed an invariant check
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    /// The durable store collaborator failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The platform metrics collaborator failed
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Sample validation errors (the observation is rejected, never
/// partially applied)
#[derive(Error, Debug)]
pub enum SampleError {
    #[error("{field} must not be negative, got {value}")]
    NegativeValue { field: &'static str, value: f64 },

    #[error("{field} must not be NaN")]
    NotANumber { field: &'static str },

    #[error("thread_count must be at least 1")]
    NoThreads,
}

/// Record integrity errors
#[derive(Error, Debug)]
pub enum RecordError {
    /// Surfaced, not auto-repaired: silently fixing statistics would
    /// hide the bug that corrupted them.
    #[error("Corrupt record for pid {pid}: {reason}")]
    Corrupt { pid: u32, reason: String },

    #[error("Aggregate is empty, cannot {operation}")]
    EmptyAggregate { operation: &'static str },

    #[error("Aggregate already seeded (count = {count})")]
    AlreadySeeded { count: u64 },
}

/// Durable store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Stored record failed verification: {0}")]
    Corrupt(#[from] RecordError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Platform collaborator errors
#[derive(Error, Debug)]
pub enum PlatformError {
    /// The platform cannot report metrics for the calling process.
    /// Treated as "no sample this time", never a hard failure.
    #[error("Process metrics unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Malformed {path}: {reason}")]
    Malformed { path: String, reason: String },
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Configuration parsing error: {reason}")]
    ParseError { reason: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, StatsError>;

/// A specialized result type for sample validation
pub type SampleResult<T> = std::result::Result<T, SampleError>;

/// A specialized result type for record operations
pub type RecordResult<T> = std::result::Result<T, RecordError>;

/// A specialized result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A specialized result type for platform operations
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// A specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl StatsError {
    /// Whether the surrounding request may continue after this error.
    ///
    /// Aggregation failures never abort the request being served; only a
    /// corrupt store deserves operator attention before continuing.
    pub fn is_recoverable(&self) -> bool {
        match self {
            StatsError::Sample(_) => true,
            StatsError::Platform(_) => true,
            StatsError::Record(RecordError::Corrupt { .. }) => false,
            StatsError::Store(StoreError::Corrupt(_)) => false,
            _ => true,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            StatsError::Sample(_) => "sample",
            StatsError::Record(_) => "record",
            StatsError::Store(_) => "store",
            StatsError::Platform(_) => "platform",
            StatsError::Config(_) => "config",
            StatsError::Io(_) => "io",
        }
    }
}
