use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConditionsError {
    #[error("count must be greater than 0 unless harvesting the whole queue")]
    ZeroCount,
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
}

/// When a harvest session stops.
///
/// `all = true` harvests until the queue appears drained; otherwise the
/// session stops once `count` unique messages have been published. `timeout`
/// bounds total session duration either way, and doubles as the visibility
/// hold requested for each received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopConditions {
    pub all: bool,
    pub count: usize,
    pub timeout: Duration,
}

impl StopConditions {
    /// Harvest until the queue appears drained, bounded by `timeout`.
    pub fn drain_within(timeout: Duration) -> Self {
        Self {
            all: true,
            count: 0,
            timeout,
        }
    }

    /// Harvest the first `count` unique messages, bounded by `timeout`.
    pub fn first_n(count: usize, timeout: Duration) -> Self {
        Self {
            all: false,
            count,
            timeout,
        }
    }

    pub fn validate(&self) -> Result<(), ConditionsError> {
        if !self.all && self.count == 0 {
            return Err(ConditionsError::ZeroCount);
        }
        if self.timeout.is_zero() {
            return Err(ConditionsError::ZeroTimeout);
        }
        Ok(())
    }
}
