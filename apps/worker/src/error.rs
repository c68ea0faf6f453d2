//! Error handling for the Resonance Worker
//!
//! This module provides a unified error type using thiserror for background
//! job processing on top of the job scheduler.

use resonance_job_engine::SchedulerError;
use resonance_shared_config::ConfigError;
use thiserror::Error;

/// Main worker error type
#[derive(Error, Debug)]
pub enum WorkerError {
    // ========== Job Processing Errors ==========
    /// Job execution was cancelled (e.g., due to shutdown)
    #[error("job cancelled: {0}")]
    Cancelled(String),

    /// Scheduler rejected an operation
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    // ========== Library Scan Errors ==========
    /// Music library path not found or inaccessible
    #[error("music library path not found: {0}")]
    LibraryNotFound(String),

    /// Directory traversal failed
    #[error("library walk failed: {0}")]
    LibraryWalk(#[from] walkdir::Error),

    // ========== Configuration Errors ==========
    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    // ========== Internal Errors ==========
    /// Internal worker error (catch-all for unexpected errors)
    #[error("internal worker error: {0}")]
    Internal(String),
}

impl WorkerError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LibraryWalk(_))
    }

    /// Get a severity level for logging
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // Critical errors that should alert operators
            Self::Configuration(_) | Self::Scheduler(SchedulerError::InvalidLaneCount(_)) => {
                ErrorSeverity::Critical
            }

            Self::Scheduler(_) | Self::LibraryNotFound(_) | Self::Internal(_) => {
                ErrorSeverity::Error
            }

            // Warnings for expected failures
            Self::LibraryWalk(_) => ErrorSeverity::Warning,

            Self::Cancelled(_) => ErrorSeverity::Info,
        }
    }

    /// Get the job type this error is related to, if applicable
    pub fn job_context(&self) -> Option<&'static str> {
        match self {
            Self::LibraryNotFound(_) | Self::LibraryWalk(_) => Some("library_scan"),
            _ => None,
        }
    }

    /// Log the error with appropriate severity
    pub fn log(&self) {
        let context = self.job_context().unwrap_or("general");
        match self.severity() {
            ErrorSeverity::Critical => {
                tracing::error!(
                    error = %self,
                    context = context,
                    retryable = self.is_retryable(),
                    "Critical worker error"
                );
            }
            ErrorSeverity::Error => {
                tracing::error!(
                    error = %self,
                    context = context,
                    retryable = self.is_retryable(),
                    "Worker error"
                );
            }
            ErrorSeverity::Warning => {
                tracing::warn!(
                    error = %self,
                    context = context,
                    retryable = self.is_retryable(),
                    "Worker warning"
                );
            }
            ErrorSeverity::Info => {
                tracing::info!(
                    error = %self,
                    context = context,
                    retryable = self.is_retryable(),
                    "Worker info"
                );
            }
        }
    }
}

/// Error severity levels for logging and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that should trigger alerts
    Critical,
    /// Standard errors
    Error,
    /// Warnings for expected failures
    Warning,
    /// Informational messages
    Info,
}

/// Result type alias for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

// ========== Conversion Implementations ==========

impl From<ConfigError> for WorkerError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<tokio::task::JoinError> for WorkerError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("background task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(!WorkerError::Cancelled("shutdown".to_string()).is_retryable());
        assert!(!WorkerError::Scheduler(SchedulerError::Stopped).is_retryable());
        assert!(!WorkerError::LibraryNotFound("/music".to_string()).is_retryable());
    }

    #[test]
    fn test_severity_levels() {
        assert_eq!(
            WorkerError::Configuration("test".to_string()).severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(
            WorkerError::Scheduler(SchedulerError::InvalidLaneCount(0)).severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(
            WorkerError::Scheduler(SchedulerError::Stopped).severity(),
            ErrorSeverity::Error
        );
        assert_eq!(
            WorkerError::Cancelled("test".to_string()).severity(),
            ErrorSeverity::Info
        );
    }

    #[test]
    fn test_job_context() {
        assert_eq!(
            WorkerError::LibraryNotFound("/music".to_string()).job_context(),
            Some("library_scan")
        );
        assert_eq!(WorkerError::Internal("boom".to_string()).job_context(), None);
    }

    #[test]
    fn test_error_display() {
        let err = WorkerError::LibraryNotFound("/srv/music".to_string());
        assert_eq!(err.to_string(), "music library path not found: /srv/music");

        let err = WorkerError::from(SchedulerError::Stopped);
        assert!(err.to_string().starts_with("scheduler error: "));
    }

    #[tokio::test]
    async fn test_from_join_error() {
        let join_err = tokio::spawn(async { panic!("scan thread died") })
            .await
            .unwrap_err();
        let err = WorkerError::from(join_err);
        assert!(matches!(err, WorkerError::Internal(_)));
        assert_eq!(err.severity(), ErrorSeverity::Error);
        assert!(err.to_string().starts_with("internal worker error: background task failed"));
    }

    #[test]
    fn test_from_config_error() {
        let err = WorkerError::from(ConfigError::ValidationError("lanes".to_string()));
        assert!(matches!(err, WorkerError::Configuration(_)));
    }
}
