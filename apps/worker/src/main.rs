use std::time::Duration;

use resonance_job_engine::{JobEvent, JobHandle, JobOutcome, Scheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod jobs;

use config::{Config, DEFAULT_LOG_FILTER};
use error::WorkerError;
use jobs::LibraryScanJob;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Configuration errors are returned before tracing exists
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(config.log_filter())
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        environment = %config.environment(),
        lanes = config.lanes,
        policy = %config.scheduling_policy,
        "Starting Resonance worker"
    );

    let scheduler = Scheduler::new(config.scheduler_config()).map_err(|e| {
        let err = WorkerError::from(e);
        err.log();
        err
    })?;

    if config.scan_on_startup {
        let job = LibraryScanJob::new(config.music_library_path().clone());
        tracing::info!(path = ?job.path(), "Queueing library scan");
        let handle = scheduler.submit(job)?;
        tokio::spawn(report(handle));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping scheduler");

    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    match tokio::time::timeout(grace, scheduler.shutdown()).await {
        Ok(Ok(())) => tracing::info!("Worker stopped"),
        Ok(Err(e)) => WorkerError::from(e).log(),
        Err(_) => tracing::warn!(
            timeout_secs = config.shutdown_timeout_secs,
            "Jobs did not stop in time, exiting anyway"
        ),
    }

    Ok(())
}

/// Log how a queued job ended
async fn report(handle: JobHandle) {
    let id = handle.id();
    let class = handle.class();

    match handle.wait().await {
        JobEvent::Finished(JobOutcome::Succeeded) => {
            tracing::info!(job = %id, class = %class, "Job succeeded");
        }
        JobEvent::Finished(outcome) => {
            tracing::warn!(job = %id, class = %class, ?outcome, "Job did not succeed");
        }
        JobEvent::Canceled => {
            tracing::info!(job = %id, class = %class, "Job canceled");
        }
        JobEvent::Started => {}
    }
}
