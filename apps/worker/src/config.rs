//! Worker configuration loaded from environment variables
//!
//! This module provides configuration management for the Resonance worker service.
//! Configuration is loaded from environment variables with sensible defaults for
//! development environments.

use std::path::PathBuf;

use resonance_job_engine::{default_lane_count, SchedulerConfig, SchedulingPolicy};
use resonance_shared_config::{parse_env, parse_env_with, CommonConfig, ConfigError, Environment};

use crate::error::WorkerResult;

/// Log filter used when neither RUST_LOG nor LOG_LEVEL is set
pub const DEFAULT_LOG_FILTER: &str = "resonance_worker=debug,resonance_job_engine=info";

/// Worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Common configuration shared with other services
    pub common: CommonConfig,

    /// Number of scheduler lanes (maximum concurrent jobs)
    pub lanes: usize,

    /// Tie-break among equally prioritised job classes
    pub scheduling_policy: SchedulingPolicy,

    /// Seconds to wait for running jobs to stop on shutdown
    pub shutdown_timeout_secs: u64,

    /// Queue a library scan as soon as the worker starts
    pub scan_on_startup: bool,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Invalid values surface as [`crate::error::WorkerError::Configuration`].
    pub fn from_env() -> WorkerResult<Self> {
        let common = CommonConfig::from_env()?;

        let lanes = parse_env_with("WORKER_LANES", default_lane_count)?;
        if lanes == 0 {
            let err = ConfigError::ValidationError("WORKER_LANES must be at least 1".to_string());
            return Err(err.into());
        }

        Ok(Self {
            common,
            lanes,
            scheduling_policy: parse_env("WORKER_SCHEDULER_POLICY", SchedulingPolicy::default())?,
            shutdown_timeout_secs: parse_env("WORKER_SHUTDOWN_TIMEOUT", 30)?,
            scan_on_startup: parse_env("WORKER_SCAN_ON_STARTUP", true)?,
        })
    }

    /// Scheduler construction parameters
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::with_lanes(self.lanes).policy(self.scheduling_policy)
    }

    /// Get music library path
    pub fn music_library_path(&self) -> &PathBuf {
        &self.common.music_library_path
    }

    /// Get environment mode
    pub fn environment(&self) -> Environment {
        self.common.environment
    }

    /// Tracing filter directive: RUST_LOG, then LOG_LEVEL, then the default
    pub fn log_filter(&self) -> &str {
        self.common.log_level.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }
}
