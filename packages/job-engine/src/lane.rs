//! Execution lanes
//!
//! A lane is a long-lived tokio task that hosts at most one job at a time.
//! It receives assignments from the dispatcher, runs the body and reports
//! back when it is free again. Lanes never touch dispatcher state directly.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::job::{Job, JobEvent, JobId, JobOutcome, JobState, JobStatus};

/// Position of a lane in the pool, starting at zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LaneId(usize);

impl LaneId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lane-{}", self.0)
    }
}

/// A job handed from the dispatcher to a lane
pub(crate) struct Assignment {
    pub(crate) state: Arc<JobState>,
    pub(crate) job: Box<dyn Job>,
}

/// Sent by a lane once it no longer hosts `job`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LaneReleased {
    pub(crate) lane: LaneId,
    pub(crate) job: JobId,
}

/// Dispatcher-side view of one lane
pub(crate) struct LaneSlot {
    pub(crate) id: LaneId,
    assignments: Option<mpsc::UnboundedSender<Assignment>>,
    current: Option<JobId>,
    task: Option<JoinHandle<()>>,
}

impl LaneSlot {
    /// Start the lane task
    pub(crate) fn spawn(id: LaneId, released: mpsc::UnboundedSender<LaneReleased>) -> Self {
        let (assignments, receiver) = mpsc::unbounded_channel();
        let lane = Lane {
            id,
            assignments: receiver,
            released,
        };
        let task = tokio::spawn(lane.run());

        Self {
            id,
            assignments: Some(assignments),
            current: None,
            task: Some(task),
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.current.is_none() && self.assignments.is_some()
    }

    pub(crate) fn current(&self) -> Option<JobId> {
        self.current
    }

    /// Hand a job to this lane
    ///
    /// On failure the lane is considered gone and the assignment is returned.
    pub(crate) fn assign(&mut self, assignment: Assignment) -> Result<(), Assignment> {
        let Some(sender) = &self.assignments else {
            return Err(assignment);
        };
        let job = assignment.state.id;
        match sender.send(assignment) {
            Ok(()) => {
                self.current = Some(job);
                Ok(())
            }
            Err(mpsc::error::SendError(assignment)) => {
                tracing::error!(lane = %self.id, "lane task is gone, retiring lane");
                self.assignments = None;
                Err(assignment)
            }
        }
    }

    pub(crate) fn release(&mut self, job: JobId) {
        if self.current == Some(job) {
            self.current = None;
        } else {
            tracing::warn!(
                lane = %self.id,
                job = %job,
                current = ?self.current,
                "release for a job this lane is not hosting"
            );
        }
    }

    /// Close the assignment channel and wait for the task to exit
    pub(crate) async fn stop(&mut self) {
        self.assignments = None;
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::error!(lane = %self.id, error = %err, "lane task ended abnormally");
            }
        }
    }
}

struct Lane {
    id: LaneId,
    assignments: mpsc::UnboundedReceiver<Assignment>,
    released: mpsc::UnboundedSender<LaneReleased>,
}

impl Lane {
    async fn run(mut self) {
        tracing::debug!(lane = %self.id, "lane started");

        while let Some(assignment) = self.assignments.recv().await {
            let job = assignment.state.id;
            self.execute(assignment).await;

            if self
                .released
                .send(LaneReleased { lane: self.id, job })
                .is_err()
            {
                break;
            }
        }

        tracing::debug!(lane = %self.id, "lane stopped");
    }

    async fn execute(&self, Assignment { state, job }: Assignment) {
        // A cancel that lands before the body starts wins
        if state.is_cancel_requested()
            || !state.transition(JobStatus::Dispatched, JobStatus::Running)
        {
            state.request_cancel();
            tracing::debug!(lane = %self.id, job = %state.id, "skipping job canceled before start");
            return;
        }

        let span = tracing::info_span!(
            "job",
            id = %state.id,
            class = %state.class,
            priority = %state.priority,
            lane = %self.id,
        );

        async {
            state.emit(JobEvent::Started);
            tracing::debug!("job started");

            let ctx = state.context(self.id);
            let result = AssertUnwindSafe(async move { job.run(ctx).await })
                .catch_unwind()
                .await;

            let outcome = match result {
                Ok(Ok(())) => JobOutcome::Succeeded,
                Ok(Err(err)) => {
                    tracing::warn!(error = %format!("{err:#}"), "job failed");
                    JobOutcome::Failed(format!("{err:#}"))
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(panic = %message, "job panicked");
                    JobOutcome::Panicked(message)
                }
            };

            let status = state.complete(outcome);
            tracing::debug!(%status, "job ended");
        }
        .instrument(span)
        .await
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
