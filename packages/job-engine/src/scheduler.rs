//! The scheduler: lane pool, pending set and the dispatch loop
//!
//! All bookkeeping lives in a single dispatcher task. Callers talk to it
//! through [`Scheduler`] handles and lanes report back over their own
//! channel, so every mutation of the pending set and of lane occupancy is
//! serialized without a lock.
//!
//! # Architecture
//!
//! ```text
//! Scheduler (handle, Clone) ──Command──▶ Dispatcher task
//!                                          ├── pending: JobId → PendingJob
//!                                          └── lanes: [LaneSlot; N]
//!                                                 │ Assignment     ▲ LaneReleased
//!                                                 ▼                │
//!                                              Lane task ──────────┘
//! ```

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::error::{SchedulerError, SchedulerResult};
use crate::job::{FnJob, Job, JobContext, JobHandle, JobId, JobState, JobStatus};
use crate::lane::{panic_message, Assignment, LaneId, LaneReleased, LaneSlot};
use crate::priority::{select_winner, Candidate, SchedulingPolicy};

/// Construction parameters, fixed for the scheduler's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of execution lanes
    pub lanes: usize,

    /// Tie-break among per-class champions
    pub policy: SchedulingPolicy,
}

impl SchedulerConfig {
    /// Configuration with a fixed lane count and the default policy
    pub fn with_lanes(lanes: usize) -> Self {
        Self {
            lanes,
            policy: SchedulingPolicy::default(),
        }
    }

    pub fn policy(mut self, policy: SchedulingPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Default for SchedulerConfig {
    /// One lane per available CPU
    fn default() -> Self {
        Self::with_lanes(default_lane_count())
    }
}

/// Hardware parallelism, falling back to a single lane
pub fn default_lane_count() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Point-in-time view of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub lanes: usize,
    pub busy_lanes: usize,
    pub waiting: usize,
    pub dispatched: usize,
    pub running: usize,
    pub policy: SchedulingPolicy,
}

impl SchedulerStats {
    pub fn idle_lanes(&self) -> usize {
        self.lanes - self.busy_lanes
    }

    /// Jobs not yet in a terminal state
    pub fn pending(&self) -> usize {
        self.waiting + self.dispatched + self.running
    }
}

pub(crate) enum Command {
    Submit {
        state: Arc<JobState>,
        job: Box<dyn Job>,
    },
    Cancel(JobId),
    Dispatch,
    Stats(oneshot::Sender<SchedulerStats>),
    Shutdown(oneshot::Sender<()>),
}

/// Live jobs by id, for cancel-by-id from any handle
///
/// Entries are removed by the dispatcher when it forgets the job.
type Registry = Arc<DashMap<JobId, Weak<JobState>>>;

/// Handle to a running scheduler
///
/// Cloning is cheap; all clones talk to the same dispatcher. The dispatcher
/// shuts down once [`Scheduler::shutdown`] is called or every handle is
/// dropped.
#[derive(Debug, Clone)]
pub struct Scheduler {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
    registry: Registry,
    lanes: usize,
    policy: SchedulingPolicy,
}

impl Scheduler {
    /// Spawn the dispatcher and its lanes
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: SchedulerConfig) -> SchedulerResult<Self> {
        if config.lanes == 0 {
            return Err(SchedulerError::InvalidLaneCount(config.lanes));
        }

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (released_tx, released_rx) = mpsc::unbounded_channel();
        let registry = Registry::default();

        let lanes = (0..config.lanes)
            .map(|index| LaneSlot::spawn(LaneId::new(index), released_tx.clone()))
            .collect();

        let dispatcher = Dispatcher {
            lanes,
            pending: HashMap::new(),
            registry: registry.clone(),
            policy: config.policy,
            next_seq: 0,
            commands: command_rx,
            accepting: true,
            released: released_rx,
            shutdown: None,
        };
        tokio::spawn(dispatcher.run());

        tracing::info!(
            lanes = config.lanes,
            policy = %config.policy,
            "Job scheduler started"
        );

        Ok(Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
            registry,
            lanes: config.lanes,
            policy: config.policy,
        })
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    /// Queue a job and attempt to dispatch
    ///
    /// Never blocks. The job's priority and class are read once, here.
    pub fn submit<J: Job>(&self, job: J) -> SchedulerResult<JobHandle> {
        self.submit_boxed(Box::new(job))
    }

    pub fn submit_boxed(&self, job: Box<dyn Job>) -> SchedulerResult<JobHandle> {
        let id = JobId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (state, events) = JobState::new(id, job.class(), job.priority());
        let handle = JobHandle::new(state.clone(), events, self.commands.downgrade());

        self.registry.insert(id, Arc::downgrade(&state));
        if let Err(err) = self.send(Command::Submit { state, job }) {
            self.registry.remove(&id);
            return Err(err);
        }
        Ok(handle)
    }

    /// Shorthand for submitting an [`FnJob`] at the default priority
    pub fn submit_fn<F, Fut>(&self, class: &'static str, body: F) -> SchedulerResult<JobHandle>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.submit(FnJob::new(class, body))
    }

    /// Cancel a job by id
    ///
    /// Same semantics as [`JobHandle::cancel`]: a job that has not started is
    /// canceled before this returns and `true` is reported. Unknown or
    /// already finished ids are ignored.
    pub fn cancel(&self, id: JobId) -> SchedulerResult<bool> {
        let state = self.registry.get(&id).and_then(|entry| entry.upgrade());
        let canceled = state.is_some_and(|state| state.request_cancel());
        self.send(Command::Cancel(id))?;
        Ok(canceled)
    }

    /// Re-run the dispatch loop without submitting anything
    ///
    /// Useful after a condition consulted by [`Job::can_execute`] changed.
    pub fn dispatch(&self) -> SchedulerResult<()> {
        self.send(Command::Dispatch)
    }

    pub async fn stats(&self) -> SchedulerResult<SchedulerStats> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stats(tx))?;
        rx.await.map_err(|_| SchedulerError::Stopped)
    }

    /// Cancel everything and wait for the lanes to drain
    ///
    /// Waiting jobs are canceled immediately; running jobs get their cancel
    /// flag set and are awaited. A body that ignores the flag delays this
    /// call until it returns.
    pub async fn shutdown(&self) -> SchedulerResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx))?;
        rx.await.map_err(|_| SchedulerError::Stopped)
    }

    fn send(&self, command: Command) -> SchedulerResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SchedulerError::Stopped)
    }
}

struct PendingJob {
    state: Arc<JobState>,
    /// Taken when the job is handed to a lane
    job: Option<Box<dyn Job>>,
    submitted: u64,
}

impl PendingJob {
    fn is_eligible(&self) -> bool {
        if self.state.status() != JobStatus::Waiting || self.state.is_cancel_requested() {
            return false;
        }
        let Some(job) = self.job.as_ref() else {
            return false;
        };

        // A panicking predicate must not take the dispatcher down with it
        match std::panic::catch_unwind(AssertUnwindSafe(|| job.can_execute())) {
            Ok(ready) => ready,
            Err(payload) => {
                tracing::warn!(
                    job = %self.state.id,
                    class = %self.state.class,
                    panic = %panic_message(payload.as_ref()),
                    "can_execute panicked, canceling job"
                );
                self.state.request_cancel();
                false
            }
        }
    }
}

struct Dispatcher {
    lanes: Vec<LaneSlot>,
    pending: HashMap<JobId, PendingJob>,
    registry: Registry,
    policy: SchedulingPolicy,
    next_seq: u64,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Cleared once every handle is gone
    accepting: bool,
    released: mpsc::UnboundedReceiver<LaneReleased>,
    /// Set once shutdown started; holds the callers to notify
    shutdown: Option<Vec<oneshot::Sender<()>>>,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(released) = self.released.recv() => self.on_released(released),
                command = self.commands.recv(), if self.accepting => match command {
                    Some(command) => self.handle(command),
                    None => {
                        self.accepting = false;
                        self.begin_shutdown(None);
                    }
                },
                else => break,
            }

            if self.shutdown.is_some() && self.lanes.iter().all(|lane| lane.current().is_none()) {
                break;
            }
        }

        self.finish_shutdown().await;
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit { state, job } => self.submit(state, job),
            Command::Cancel(id) => self.cancel(id),
            Command::Dispatch => self.dispatch(),
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown(reply) => self.begin_shutdown(Some(reply)),
        }
    }

    fn submit(&mut self, state: Arc<JobState>, job: Box<dyn Job>) {
        if self.shutdown.is_some() {
            tracing::debug!(job = %state.id, "rejecting job submitted during shutdown");
            state.request_cancel();
            self.registry.remove(&state.id);
            return;
        }

        self.next_seq += 1;
        tracing::debug!(
            job = %state.id,
            class = %state.class,
            priority = %state.priority,
            "job submitted"
        );
        self.pending.insert(
            state.id,
            PendingJob {
                state,
                job: Some(job),
                submitted: self.next_seq,
            },
        );
        self.dispatch();
    }

    fn cancel(&mut self, id: JobId) {
        if let Some(entry) = self.pending.get(&id) {
            if entry.state.request_cancel() {
                tracing::debug!(job = %id, "job canceled before running");
            } else if entry.state.status() == JobStatus::Running {
                tracing::debug!(job = %id, "cancel requested for running job");
            }
        }
        self.collect_garbage();
    }

    fn on_released(&mut self, released: LaneReleased) {
        if let Some(lane) = self.lanes.get_mut(released.lane.index()) {
            lane.release(released.job);
        }
        self.pending.remove(&released.job);
        self.registry.remove(&released.job);

        if self.shutdown.is_none() {
            self.dispatch();
        }
    }

    /// Dispatch until no lane is idle or nothing is eligible
    fn dispatch(&mut self) {
        if self.shutdown.is_some() {
            return;
        }
        while self.dispatch_step() {}
    }

    /// One dispatch attempt; `false` means nothing more can be done now
    fn dispatch_step(&mut self) -> bool {
        self.collect_garbage();

        let Some(lane_index) = self.lanes.iter().position(LaneSlot::is_idle) else {
            return false;
        };

        let candidates = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.is_eligible())
            .map(|(id, entry)| Candidate {
                key: *id,
                priority: entry.state.priority,
                class: entry.state.class,
                submitted: entry.submitted,
            });

        let Some(winner) = select_winner(candidates, self.policy) else {
            return false;
        };

        let Some(entry) = self.pending.get_mut(&winner.key) else {
            return false;
        };

        // Lost a race with a cancel; the next step collects it
        if !entry
            .state
            .transition(JobStatus::Waiting, JobStatus::Dispatched)
        {
            return true;
        }
        let Some(job) = entry.job.take() else {
            return false;
        };

        let state = entry.state.clone();
        let lane = &mut self.lanes[lane_index];
        tracing::debug!(
            job = %state.id,
            class = %state.class,
            priority = %state.priority,
            lane = %lane.id,
            "job dispatched"
        );

        if let Err(Assignment { state, .. }) = lane.assign(Assignment { state, job }) {
            state.request_cancel();
        }
        true
    }

    /// Drop entries that reached a terminal state without occupying a lane
    fn collect_garbage(&mut self) {
        let hosted: Vec<JobId> = self.lanes.iter().filter_map(LaneSlot::current).collect();
        let registry = &self.registry;
        self.pending.retain(|id, entry| {
            let keep = !entry.state.status().is_terminal() || hosted.contains(id);
            if !keep {
                registry.remove(id);
            }
            keep
        });
    }

    fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats {
            lanes: self.lanes.len(),
            busy_lanes: self
                .lanes
                .iter()
                .filter(|lane| lane.current().is_some())
                .count(),
            waiting: 0,
            dispatched: 0,
            running: 0,
            policy: self.policy,
        };

        for entry in self.pending.values() {
            match entry.state.status() {
                JobStatus::Waiting => stats.waiting += 1,
                JobStatus::Dispatched => stats.dispatched += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Finished | JobStatus::Canceled => {}
            }
        }
        stats
    }

    fn begin_shutdown(&mut self, reply: Option<oneshot::Sender<()>>) {
        let waiters = self.shutdown.get_or_insert_with(|| {
            tracing::info!(pending = self.pending.len(), "Job scheduler shutting down");
            Vec::new()
        });
        waiters.extend(reply);

        for entry in self.pending.values() {
            entry.state.request_cancel();
        }
        self.collect_garbage();
    }

    async fn finish_shutdown(&mut self) {
        // Anything queued after the last check gets canceled, later sends fail
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Submit { state, .. } => {
                    state.request_cancel();
                    self.registry.remove(&state.id);
                }
                Command::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
                Command::Shutdown(reply) => self.begin_shutdown(Some(reply)),
                Command::Cancel(_) | Command::Dispatch => {}
            }
        }

        for lane in &mut self.lanes {
            lane.stop().await;
        }
        self.pending.clear();
        self.registry.clear();

        tracing::info!("Job scheduler stopped");
        for waiter in self.shutdown.take().unwrap_or_default() {
            let _ = waiter.send(());
        }
    }
}
