//! Mock jobs for scheduler integration tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use resonance_job_engine::{
    FnJob, Job, JobContext, JobEvent, JobHandle, JobStatus, Priority, Scheduler, SchedulerStats,
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Upper bound for any single wait in a test
pub const WAIT: Duration = Duration::from_secs(5);

/// Order in which job bodies started, with the lane each one ran on
#[derive(Clone, Default)]
pub struct StartLog {
    entries: Arc<Mutex<Vec<(&'static str, usize)>>>,
}

impl StartLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &'static str, ctx: &JobContext) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((name, ctx.lane().index()));
    }

    /// Names in start order
    pub fn names(&self) -> Vec<&'static str> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn lane_of(&self, name: &str) -> Option<usize> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, lane)| *lane)
    }
}

/// A latch that stays open once opened
#[derive(Clone, Default)]
pub struct Gate {
    token: CancellationToken,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.token.cancel();
    }

    pub async fn wait(&self) {
        self.token.cancelled().await
    }
}

/// Switch consulted by `can_execute`
#[derive(Clone, Default)]
pub struct Switch {
    on: Arc<AtomicBool>,
}

impl Switch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turn_on(&self) {
        self.on.store(true, Ordering::SeqCst);
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
}

/// Job that logs its start and finishes immediately
pub fn recording_job(
    name: &'static str,
    class: &'static str,
    priority: Priority,
    log: &StartLog,
) -> impl Job {
    let log = log.clone();
    FnJob::new(class, move |ctx| async move {
        log.record(name, &ctx);
        anyhow::Ok(())
    })
    .with_priority(priority)
}

/// Body that logs its start, then holds its lane until `gate` opens
fn hold_until(
    name: &'static str,
    log: &StartLog,
    gate: &Gate,
) -> impl FnOnce(JobContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + 'static {
    let log = log.clone();
    let gate = gate.clone();
    move |ctx: JobContext| -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(async move {
            log.record(name, &ctx);
            gate.wait().await;
            anyhow::Ok(())
        })
    }
}

/// Job that logs its start, then holds its lane until `gate` opens
pub fn held_job(
    name: &'static str,
    class: &'static str,
    priority: Priority,
    log: &StartLog,
    gate: &Gate,
) -> impl Job {
    FnJob::new(class, hold_until(name, log, gate)).with_priority(priority)
}

/// Like [`held_job`], but only eligible once `switch` is on
pub fn switched_job(
    name: &'static str,
    class: &'static str,
    priority: Priority,
    log: &StartLog,
    gate: &Gate,
    switch: &Switch,
) -> impl Job {
    let switch = switch.clone();
    FnJob::new(class, hold_until(name, log, gate))
        .with_priority(priority)
        .when(move || switch.is_on())
}

/// Job that stops as soon as cancellation is requested, then waits for `gate`
pub fn cooperative_job(gate: &Gate) -> impl Job {
    let gate = gate.clone();
    FnJob::new("cooperative", move |ctx| async move {
        ctx.cancelled().await;
        gate.wait().await;
        anyhow::Ok(())
    })
}

/// Tracks how many bodies run at once
#[derive(Clone, Default)]
pub struct ConcurrencyMeter {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl ConcurrencyMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job(&self, hold: Duration) -> impl Job {
        let meter = self.clone();
        FnJob::new("metered", move |_ctx| async move {
            let now = meter.active.fetch_add(1, Ordering::SeqCst) + 1;
            meter.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(hold).await;
            meter.active.fetch_sub(1, Ordering::SeqCst);
            meter.completed.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(())
        })
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Stats round trip; also guarantees every earlier command was processed
pub async fn settle(scheduler: &Scheduler) -> SchedulerStats {
    timeout(WAIT, scheduler.stats())
        .await
        .expect("scheduler did not answer in time")
        .expect("scheduler stopped")
}

/// Next lifecycle event of a job, failing the test on timeout
pub async fn next_event(handle: &mut JobHandle) -> JobEvent {
    timeout(WAIT, handle.next_event())
        .await
        .expect("no job event in time")
        .expect("event stream ended")
}

/// Wait for the job's `Started` notification
///
/// The body may already have returned by the time this resolves.
pub async fn expect_started(handle: &mut JobHandle) {
    assert_eq!(next_event(handle).await, JobEvent::Started);
}

/// Poll `condition` until it holds, failing the test on timeout
pub async fn wait_until(condition: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}

/// Terminal event of a job, failing the test on timeout
pub async fn finish(handle: JobHandle) -> JobEvent {
    timeout(WAIT, handle.wait())
        .await
        .expect("job did not finish in time")
}
