//! Error types for kvguard operations.

use thiserror::Error;

/// Main error type for kvguard operations.
#[derive(Error, Debug)]
pub enum KvGuardError {
    /// The backing store could not be reached or rejected the command
    #[error("Store error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The caller-supplied deadline elapsed before the store answered
    #[error("Store operation timed out")]
    Timeout,

    /// Argument rejected before any store round-trip
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A scan or purge stopped part way through
    #[error("Scan interrupted after {processed} keys: {source}")]
    PartialScan {
        /// Keys collected (scan) or deleted (purge) before the interruption
        processed: u64,
        /// What interrupted the scan
        #[source]
        source: Box<KvGuardError>,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KvGuardError {
    /// Whether the failure came from talking to the store (connection or deadline).
    ///
    /// Callers use this to pick their own fail-open or fail-closed policy.
    pub fn is_store_unavailable(&self) -> bool {
        match self {
            KvGuardError::Redis(_) | KvGuardError::Timeout => true,
            KvGuardError::PartialScan { source, .. } => source.is_store_unavailable(),
            _ => false,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        KvGuardError::InvalidArgument(msg.into())
    }
}

impl From<config::ConfigError> for KvGuardError {
    fn from(err: config::ConfigError) -> Self {
        KvGuardError::Config(err.to_string())
    }
}

/// Result type alias for kvguard operations.
pub type Result<T> = std::result::Result<T, KvGuardError>;
