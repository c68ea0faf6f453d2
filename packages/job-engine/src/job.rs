//! Jobs: the units of work the scheduler runs
//!
//! A job is anything implementing [`Job`]. The scheduler only looks at its
//! class, priority and [`Job::can_execute`]; what the body does is opaque.
//!
//! # Lifecycle
//!
//! ```text
//! Waiting ──dispatch──▶ Dispatched ──lane──▶ Running ──body returns──▶ Finished
//!    │                      │                   └──body returns, cancel set──▶ Canceled
//!    └──────cancel()────────┴──────────────────────────────────────────────▶ Canceled
//! ```
//!
//! Transitions are compare-and-swap on a shared atomic, so a cancel racing a
//! lane picking up the job has exactly one winner.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::lane::LaneId;
use crate::priority::{JobClass, Priority};
use crate::scheduler::Command;

/// Unique job identifier, increasing in construction order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct JobId(u64);

impl JobId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// A unit of schedulable background work
///
/// Bodies are cooperative: the engine never preempts a running job. A body
/// that wants to stop early must poll [`JobContext::is_cancelled`] or await
/// [`JobContext::cancelled`] at safe points.
///
/// # Example
///
/// ```
/// use futures_util::future::BoxFuture;
/// use resonance_job_engine::{Job, JobContext, Priority};
///
/// struct CoverArtFetch {
///     album_id: i64,
/// }
///
/// impl Job for CoverArtFetch {
///     fn priority(&self) -> Priority {
///         Priority::Low
///     }
///
///     fn run(self: Box<Self>, ctx: JobContext) -> BoxFuture<'static, anyhow::Result<()>> {
///         Box::pin(async move {
///             if ctx.is_cancelled() {
///                 return Ok(());
///             }
///             tracing::debug!(album_id = self.album_id, "fetching cover art");
///             anyhow::Ok(())
///         })
///     }
/// }
/// ```
pub trait Job: Send + 'static {
    /// Fairness group; defaults to the implementing type
    fn class(&self) -> JobClass {
        JobClass::of::<Self>()
    }

    fn priority(&self) -> Priority {
        Priority::Normal
    }

    /// Temporarily decline selection while staying in the waiting set
    ///
    /// Evaluated on every dispatch pass. Call [`crate::Scheduler::dispatch`]
    /// once the precondition changes.
    fn can_execute(&self) -> bool {
        true
    }

    /// The job body, executed on a lane
    fn run(self: Box<Self>, ctx: JobContext) -> BoxFuture<'static, anyhow::Result<()>>;
}

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum JobStatus {
    Waiting = 0,
    Dispatched = 1,
    Running = 2,
    Finished = 3,
    Canceled = 4,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Canceled)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Waiting,
            1 => Self::Dispatched,
            2 => Self::Running,
            3 => Self::Finished,
            _ => Self::Canceled,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Waiting => "waiting",
            Self::Dispatched => "dispatched",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// How a body that ran to completion ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    /// The body returned an error
    Failed(String),
    /// The body panicked; the lane survived
    Panicked(String),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Per-job lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// A lane began executing the body
    Started,
    /// The job was canceled, either before running or cooperatively
    Canceled,
    /// The body returned without cancellation being requested
    Finished(JobOutcome),
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started)
    }
}

/// State shared between the handle, the dispatcher and the hosting lane
pub(crate) struct JobState {
    pub(crate) id: JobId,
    pub(crate) class: JobClass,
    pub(crate) priority: Priority,
    status: AtomicU8,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<JobEvent>,
}

impl JobState {
    pub(crate) fn new(
        id: JobId,
        class: JobClass,
        priority: Priority,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<JobEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(Self {
            id,
            class,
            priority,
            status: AtomicU8::new(JobStatus::Waiting as u8),
            cancel: CancellationToken::new(),
            events,
        });
        (state, receiver)
    }

    pub(crate) fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn transition(&self, from: JobStatus, to: JobStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn emit(&self, event: JobEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Set the cancel flag; cancel outright if the job has not started yet
    ///
    /// Returns `true` when this call moved the job to `Canceled`.
    pub(crate) fn request_cancel(&self) -> bool {
        self.cancel.cancel();
        for from in [JobStatus::Waiting, JobStatus::Dispatched] {
            if self.transition(from, JobStatus::Canceled) {
                self.emit(JobEvent::Canceled);
                return true;
            }
        }
        false
    }

    /// Record the end of a running body
    pub(crate) fn complete(&self, outcome: JobOutcome) -> JobStatus {
        let status = if self.cancel.is_cancelled() {
            JobStatus::Canceled
        } else {
            JobStatus::Finished
        };

        if !self.transition(JobStatus::Running, status) {
            return self.status();
        }

        match status {
            JobStatus::Canceled => self.emit(JobEvent::Canceled),
            _ => self.emit(JobEvent::Finished(outcome)),
        }
        status
    }

    pub(crate) fn context(&self, lane: LaneId) -> JobContext {
        JobContext {
            job_id: self.id,
            lane,
            cancel: self.cancel.clone(),
        }
    }
}

impl fmt::Debug for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobState")
            .field("id", &self.id)
            .field("class", &self.class)
            .field("priority", &self.priority)
            .field("status", &self.status())
            .field("cancel_requested", &self.is_cancel_requested())
            .finish()
    }
}

/// What a running body gets to see of the engine
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: JobId,
    lane: LaneId,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// The lane hosting this run
    pub fn lane(&self) -> LaneId {
        self.lane
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Token for handing to nested work, e.g. a `spawn_blocking` closure
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Caller-side handle to a submitted job
///
/// Dropping the handle does not cancel the job.
pub struct JobHandle {
    state: Arc<JobState>,
    events: mpsc::UnboundedReceiver<JobEvent>,
    scheduler: mpsc::WeakUnboundedSender<Command>,
    terminal: Option<JobEvent>,
}

impl JobHandle {
    pub(crate) fn new(
        state: Arc<JobState>,
        events: mpsc::UnboundedReceiver<JobEvent>,
        scheduler: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            state,
            events,
            scheduler,
            terminal: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.state.id
    }

    pub fn class(&self) -> JobClass {
        self.state.class
    }

    pub fn priority(&self) -> Priority {
        self.state.priority
    }

    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.state.is_cancel_requested()
    }

    /// Request cancellation
    ///
    /// A job that has not started is canceled on the spot and `true` is
    /// returned. A running job only gets its cancel flag set.
    pub fn cancel(&self) -> bool {
        let canceled = self.state.request_cancel();
        if let Some(scheduler) = self.scheduler.upgrade() {
            let _ = scheduler.send(Command::Cancel(self.state.id));
        }
        canceled
    }

    /// Next lifecycle notification, `None` once the terminal one was seen
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        if self.terminal.is_some() {
            return None;
        }
        let event = self.events.recv().await?;
        if event.is_terminal() {
            self.terminal = Some(event.clone());
        }
        Some(event)
    }

    /// Wait for the job to reach a terminal state
    ///
    /// Returns the terminal event: [`JobEvent::Canceled`] or
    /// [`JobEvent::Finished`].
    pub async fn wait(mut self) -> JobEvent {
        while self.terminal.is_none() {
            if self.next_event().await.is_none() {
                break;
            }
        }
        // The state owns the sender, so the channel cannot close before the
        // terminal event is delivered
        self.terminal.unwrap_or(JobEvent::Canceled)
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("state", &self.state)
            .finish()
    }
}

/// Predicate consulted by [`FnJob::can_execute`]
type Gate = Box<dyn Fn() -> bool + Send + Sync>;

/// A job backed by an async closure
///
/// Closures have no meaningful type name, so the class is given explicitly.
///
/// ```
/// use resonance_job_engine::{FnJob, Priority};
///
/// let job = FnJob::new("artist_lookup", |ctx| async move {
///     tracing::debug!(job = %ctx.job_id(), "looking up artist");
///     anyhow::Ok(())
/// })
/// .with_priority(Priority::High);
/// ```
pub struct FnJob<F> {
    class: JobClass,
    priority: Priority,
    gate: Option<Gate>,
    body: F,
}

impl<F, Fut> FnJob<F>
where
    F: FnOnce(JobContext) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    pub fn new(class: &'static str, body: F) -> Self {
        Self {
            class: JobClass::new(class),
            priority: Priority::default(),
            gate: None,
            body,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Only become eligible while `gate` returns `true`
    pub fn when(mut self, gate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.gate = Some(Box::new(gate));
        self
    }
}

impl<F, Fut> Job for FnJob<F>
where
    F: FnOnce(JobContext) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn class(&self) -> JobClass {
        self.class
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn can_execute(&self) -> bool {
        self.gate.as_ref().map_or(true, |gate| gate())
    }

    fn run(self: Box<Self>, ctx: JobContext) -> BoxFuture<'static, anyhow::Result<()>> {
        let this = *self;
        (this.body)(ctx).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> (Arc<JobState>, mpsc::UnboundedReceiver<JobEvent>) {
        JobState::new(JobId::new(1), JobClass::new("test"), Priority::Normal)
    }

    #[test]
    fn test_new_job_is_waiting() {
        let (state, _events) = state();
        assert_eq!(state.status(), JobStatus::Waiting);
        assert!(!state.is_cancel_requested());
    }

    #[test]
    fn test_transitions_are_one_directional() {
        let (state, _events) = state();
        assert!(state.transition(JobStatus::Waiting, JobStatus::Dispatched));
        assert!(!state.transition(JobStatus::Waiting, JobStatus::Dispatched));
        assert!(state.transition(JobStatus::Dispatched, JobStatus::Running));
        assert_eq!(state.complete(JobOutcome::Succeeded), JobStatus::Finished);
        assert!(!state.transition(JobStatus::Running, JobStatus::Canceled));
        assert_eq!(state.status(), JobStatus::Finished);
    }

    #[test]
    fn test_cancel_waiting_is_immediate() {
        let (state, mut events) = state();
        assert!(state.request_cancel());
        assert_eq!(state.status(), JobStatus::Canceled);
        assert_eq!(events.try_recv().unwrap(), JobEvent::Canceled);

        // Second request is a no-op and emits nothing
        assert!(!state.request_cancel());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_cancel_dispatched_is_immediate() {
        let (state, mut events) = state();
        assert!(state.transition(JobStatus::Waiting, JobStatus::Dispatched));
        assert!(state.request_cancel());
        assert_eq!(state.status(), JobStatus::Canceled);
        assert!(!state.transition(JobStatus::Dispatched, JobStatus::Running));
        assert_eq!(events.try_recv().unwrap(), JobEvent::Canceled);
    }

    #[test]
    fn test_cancel_running_only_sets_flag() {
        let (state, mut events) = state();
        assert!(state.transition(JobStatus::Waiting, JobStatus::Dispatched));
        assert!(state.transition(JobStatus::Dispatched, JobStatus::Running));

        assert!(!state.request_cancel());
        assert_eq!(state.status(), JobStatus::Running);
        assert!(state.is_cancel_requested());
        assert!(events.try_recv().is_err());

        assert_eq!(state.complete(JobOutcome::Succeeded), JobStatus::Canceled);
        assert_eq!(events.try_recv().unwrap(), JobEvent::Canceled);
    }

    #[test]
    fn test_failed_outcome_is_reported_as_finished() {
        let (state, mut events) = state();
        assert!(state.transition(JobStatus::Waiting, JobStatus::Dispatched));
        assert!(state.transition(JobStatus::Dispatched, JobStatus::Running));

        let outcome = JobOutcome::Failed("tag read failed".to_string());
        assert_eq!(state.complete(outcome.clone()), JobStatus::Finished);
        assert_eq!(events.try_recv().unwrap(), JobEvent::Finished(outcome));
    }

    #[test]
    fn test_context_observes_cancellation() {
        let (state, _events) = state();
        let ctx = state.context(LaneId::new(0));
        assert_eq!(ctx.job_id(), JobId::new(1));
        assert!(!ctx.is_cancelled());
        state.request_cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_fn_job_gate() {
        let open = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = open.clone();
        let job = FnJob::new("gated", |_ctx| async { anyhow::Ok(()) })
            .with_priority(Priority::High)
            .when(move || flag.load(Ordering::SeqCst));

        assert_eq!(job.class(), JobClass::new("gated"));
        assert_eq!(job.priority(), Priority::High);
        assert!(!job.can_execute());
        open.store(true, Ordering::SeqCst);
        assert!(job.can_execute());
    }

    #[test]
    fn test_event_terminality() {
        assert!(!JobEvent::Started.is_terminal());
        assert!(JobEvent::Canceled.is_terminal());
        assert!(JobEvent::Finished(JobOutcome::Succeeded).is_terminal());
        assert!(JobStatus::Canceled.is_terminal());
        assert!(!JobStatus::Dispatched.is_terminal());
    }
}
