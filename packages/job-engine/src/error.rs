//! Scheduler error types

use thiserror::Error;

/// Errors surfaced by the scheduler handle
///
/// Job bodies never produce these: a failing job is reported on its own
/// event channel and does not affect the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The lane pool must contain at least one lane
    #[error("scheduler requires at least one lane, got {0}")]
    InvalidLaneCount(usize),

    /// The dispatcher task has shut down and no longer accepts commands
    #[error("scheduler has stopped")]
    Stopped,

    /// A priority or policy name could not be parsed
    #[error("unknown {kind}: '{value}'")]
    UnknownVariant { kind: &'static str, value: String },
}

impl SchedulerError {
    pub(crate) fn unknown_variant(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownVariant {
            kind,
            value: value.into(),
        }
    }
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            SchedulerError::InvalidLaneCount(0).to_string(),
            "scheduler requires at least one lane, got 0"
        );
        assert_eq!(SchedulerError::Stopped.to_string(), "scheduler has stopped");
        assert_eq!(
            SchedulerError::unknown_variant("priority", "urgent").to_string(),
            "unknown priority: 'urgent'"
        );
    }
}
