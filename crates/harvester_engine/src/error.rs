use std::io;

use harvester_core::ConditionsError;
use thiserror::Error;

/// Failure of a single queue-service call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("queue service {operation} failed: {message}")]
pub struct TransportError {
    pub operation: &'static str,
    pub message: String,
}

impl TransportError {
    pub(crate) fn new(operation: &'static str, err: impl ToString) -> Self {
        Self {
            operation,
            message: err.to_string(),
        }
    }
}

/// Failure of a harvest session, surfaced either before any thread starts
/// (configuration) or collected from workers after the stream ends.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("invalid harvester configuration: {0}")]
    Configuration(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<ConditionsError> for HarvestError {
    fn from(err: ConditionsError) -> Self {
        HarvestError::Configuration(err.to_string())
    }
}

/// Failure in the disk-backed message cache.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no application data directory on this platform")]
    UnsupportedPlatform,
    #[error("cache directory missing or not writable: {0}")]
    CacheDir(String),
    #[error("malformed cache record: {0}")]
    Malformed(String),
    #[error("cache writer is not running")]
    WriterStopped,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
