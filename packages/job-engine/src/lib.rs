//! Background job scheduler for Resonance
//!
//! Runs arbitrary jobs (metadata lookups, cover art fetches, library scans,
//! downloads) on a fixed pool of execution lanes without blocking the caller.
//!
//! When a lane is free, the next job is chosen as follows:
//!
//! - the highest [`Priority`] among eligible waiting jobs always wins;
//! - at equal priority, every [`JobClass`] nominates its newest job;
//! - the [`SchedulingPolicy`] (LIFO by default) picks among those.
//!
//! Cancellation is cooperative. A job that has not started yet is canceled
//! immediately; a running job only sees its cancel flag set and decides when
//! to stop.
//!
//! # Example
//!
//! ```no_run
//! use resonance_job_engine::{FnJob, JobEvent, Priority, Scheduler, SchedulerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = Scheduler::new(SchedulerConfig::with_lanes(4))?;
//!
//! let handle = scheduler.submit(
//!     FnJob::new("album_search", |ctx| async move {
//!         if ctx.is_cancelled() {
//!             return Ok(());
//!         }
//!         // ... query the metadata provider
//!         anyhow::Ok(())
//!     })
//!     .with_priority(Priority::High),
//! )?;
//!
//! match handle.wait().await {
//!     JobEvent::Finished(outcome) => println!("search finished: {outcome:?}"),
//!     JobEvent::Canceled => println!("search canceled"),
//!     JobEvent::Started => unreachable!("wait only returns terminal events"),
//! }
//!
//! scheduler.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod job;
mod lane;
mod priority;
mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use job::{FnJob, Job, JobContext, JobEvent, JobHandle, JobId, JobOutcome, JobStatus};
pub use lane::LaneId;
pub use priority::{select_winner, Candidate, JobClass, Priority, SchedulingPolicy};
pub use scheduler::{default_lane_count, Scheduler, SchedulerConfig, SchedulerStats};
