// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cron-driven job scheduler.
//!
//! Jobs are registered by unique name with a cron expression (five or six
//! fields, seconds optional) and an async function. After [`Scheduler::start`]
//! every job gets a dispatch loop that sleeps until the next occurrence and
//! then hands a run to the shared worker pool.
//!
//! Each run gets a [`JobContext`] with its own cancellation token and a
//! deadline (30 minutes by default). Runs are logged on start and on
//! completion with their duration; a failing or panicking job is logged and
//! never takes the scheduler down. A run that fires while the previous run of
//! the same job is still active is skipped.
//!
//! [`Scheduler::stop`] cancels in-flight runs and waits until they drain.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use croner::Cron;
use finops_core::ErrorKind;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Scheduler errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchedulerError {
    /// The cron expression did not parse.
    #[error("Invalid schedule '{expression}' for job '{job}': {reason}")]
    InvalidSchedule {
        /// Job name.
        job: String,
        /// The rejected expression.
        expression: String,
        /// Parser message.
        reason: String,
    },

    /// A job with this name is already registered.
    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    /// No job with this name is registered.
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    /// The scheduler was already started (or stopped).
    #[error("Scheduler already started")]
    AlreadyStarted,
}

impl SchedulerError {
    /// Taxonomy kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSchedule { .. } => ErrorKind::Validation,
            Self::DuplicateJob(_) => ErrorKind::Duplicate,
            Self::UnknownJob(_) => ErrorKind::NotFound,
            Self::AlreadyStarted => ErrorKind::Internal,
        }
    }
}

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Size of the shared worker pool.
    pub max_concurrent_runs: usize,
    /// Deadline for a single run.
    pub run_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 4,
            run_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Per-run context handed to the job function.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job name.
    pub job: String,
    /// Unique id of this run, for log correlation.
    pub run_id: Uuid,
    /// Cancelled when the scheduler stops or the run times out.
    pub cancel: CancellationToken,
    /// When the run will be abandoned.
    pub deadline: Instant,
}

impl JobContext {
    /// Whether the run has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The job returned `Ok`.
    Completed,
    /// The job returned an error or panicked.
    Failed(String),
    /// The run exceeded its deadline.
    TimedOut,
    /// The scheduler stopped while the run was active.
    Cancelled,
    /// A previous run of the same job was still active.
    Skipped,
}

/// Boxed job function.
pub type JobFn = Arc<dyn Fn(JobContext) -> BoxFuture<'static, crate::error::Result<()>> + Send + Sync>;

struct Job {
    name: String,
    expression: String,
    cron: Cron,
    func: JobFn,
    running: AtomicBool,
}

/// Snapshot of a registered job.
#[derive(Debug, Clone)]
pub struct JobInfo {
    /// Job name.
    pub name: String,
    /// Cron expression as registered.
    pub schedule: String,
    /// Next occurrence after now, if any.
    pub next_run: Option<DateTime<Utc>>,
    /// Whether a run is in progress.
    pub running: bool,
}

/// Resets the running flag when a run ends, including on panic.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Wall-clock time derived from the tokio clock, so paused-time tests see
/// cron occurrences advance with virtual time.
#[derive(Clone, Copy)]
struct Clock {
    wall: DateTime<Utc>,
    mono: Instant,
}

impl Clock {
    fn new() -> Self {
        Self {
            wall: Utc::now(),
            mono: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.mono.elapsed()).unwrap_or_default();
        self.wall + elapsed
    }
}

struct Inner {
    config: SchedulerConfig,
    jobs: RwLock<BTreeMap<String, Arc<Job>>>,
    pool: Arc<Semaphore>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
    clock: Clock,
}

/// Cron job registry and dispatcher. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("jobs", &self.job_names())
            .field("started", &self.inner.started.load(Ordering::Acquire))
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler with no jobs.
    pub fn new(config: SchedulerConfig) -> Self {
        let permits = config.max_concurrent_runs.max(1);
        Self {
            inner: Arc::new(Inner {
                pool: Arc::new(Semaphore::new(permits)),
                config,
                jobs: RwLock::new(BTreeMap::new()),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                started: AtomicBool::new(false),
                clock: Clock::new(),
            }),
        }
    }

    /// Register a job. Names are unique and registration closes at start.
    pub fn register<F, Fut>(&self, name: impl Into<String>, expression: &str, func: F) -> Result<()>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::error::Result<()>> + Send + 'static,
    {
        let name = name.into();
        if self.inner.started.load(Ordering::Acquire) {
            return Err(SchedulerError::AlreadyStarted);
        }
        let cron = Cron::new(expression)
            .with_seconds_optional()
            .parse()
            .map_err(|e| SchedulerError::InvalidSchedule {
                job: name.clone(),
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;

        let mut jobs = self.inner.jobs.write().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(&name) {
            return Err(SchedulerError::DuplicateJob(name));
        }
        let func: JobFn = Arc::new(move |ctx| Box::pin(func(ctx)));
        jobs.insert(
            name.clone(),
            Arc::new(Job {
                name: name.clone(),
                expression: expression.to_string(),
                cron,
                func,
                running: AtomicBool::new(false),
            }),
        );
        info!(job = %name, schedule = %expression, "Job registered");
        Ok(())
    }

    /// Registered job names in order.
    pub fn job_names(&self) -> Vec<String> {
        self.inner
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Snapshot of every job.
    pub fn jobs(&self) -> Vec<JobInfo> {
        let now = self.inner.clock.now();
        self.inner
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|job| JobInfo {
                name: job.name.clone(),
                schedule: job.expression.clone(),
                next_run: job.cron.find_next_occurrence(&now, false).ok(),
                running: job.running.load(Ordering::Acquire),
            })
            .collect()
    }

    /// Begin dispatching every registered job.
    pub fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyStarted);
        }
        let jobs: Vec<Arc<Job>> = self
            .inner
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        info!(
            jobs = jobs.len(),
            pool = self.inner.config.max_concurrent_runs,
            "Scheduler started"
        );
        for job in jobs {
            let inner = self.inner.clone();
            self.inner.tracker.spawn(dispatch_loop(inner, job));
        }
        Ok(())
    }

    /// Cancel in-flight runs and wait until every task has drained.
    pub async fn stop(&self) {
        info!("Scheduler stopping");
        self.inner.started.store(true, Ordering::Release);
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("Scheduler stopped");
    }

    /// Run a job now, outside its schedule, and wait for the outcome.
    pub async fn run_now(&self, name: &str) -> Result<RunOutcome> {
        let job = self
            .inner
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;

        let handle = self
            .inner
            .tracker
            .spawn(execute(self.inner.clone(), job, "manual"));
        Ok(handle
            .await
            .unwrap_or_else(|e| RunOutcome::Failed(format!("job panicked: {}", e))))
    }
}

async fn dispatch_loop(inner: Arc<Inner>, job: Arc<Job>) {
    loop {
        let now = inner.clock.now();
        let next = match job.cron.find_next_occurrence(&now, false) {
            Ok(next) => next,
            Err(e) => {
                error!(job = %job.name, error = %e, "No next occurrence, dispatch stopped");
                return;
            }
        };
        let delay = (next - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let run = execute(inner.clone(), job.clone(), "schedule");
        inner.tracker.spawn(run);
    }
}

async fn execute(inner: Arc<Inner>, job: Arc<Job>, trigger: &'static str) -> RunOutcome {
    if job.running.swap(true, Ordering::AcqRel) {
        warn!(job = %job.name, trigger, "Previous run still active, skipping");
        return RunOutcome::Skipped;
    }
    let _running = RunningGuard(&job.running);

    let _permit = tokio::select! {
        permit = inner.pool.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return RunOutcome::Cancelled,
        },
        _ = inner.cancel.cancelled() => return RunOutcome::Cancelled,
    };

    let timeout = inner.config.run_timeout;
    let ctx = JobContext {
        job: job.name.clone(),
        run_id: Uuid::new_v4(),
        cancel: inner.cancel.child_token(),
        deadline: Instant::now() + timeout,
    };
    let run_id = ctx.run_id;
    let run_cancel = ctx.cancel.clone();
    info!(job = %job.name, run_id = %run_id, trigger, "Job started");
    let started = Instant::now();

    let outcome = tokio::select! {
        biased;
        _ = inner.cancel.cancelled() => RunOutcome::Cancelled,
        result = tokio::time::timeout(timeout, (job.func)(ctx)) => match result {
            Ok(Ok(())) => RunOutcome::Completed,
            Ok(Err(e)) => RunOutcome::Failed(e.to_string()),
            Err(_) => RunOutcome::TimedOut,
        },
    };
    run_cancel.cancel();

    let duration_ms = started.elapsed().as_millis() as u64;
    match &outcome {
        RunOutcome::Completed => {
            info!(job = %job.name, run_id = %run_id, duration_ms, "Job completed")
        }
        RunOutcome::Failed(reason) => {
            error!(job = %job.name, run_id = %run_id, duration_ms, error = %reason, "Job failed")
        }
        RunOutcome::TimedOut => {
            error!(job = %job.name, run_id = %run_id, duration_ms, "Job timed out")
        }
        RunOutcome::Cancelled => {
            warn!(job = %job.name, run_id = %run_id, duration_ms, "Job cancelled")
        }
        RunOutcome::Skipped => {}
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn counting_job(counter: Arc<AtomicUsize>) -> impl Fn(JobContext) -> BoxFuture<'static, crate::error::Result<()>> {
        move |_ctx| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[test]
    fn test_register_validation() {
        let scheduler = Scheduler::default();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .register("cost-sync", "0 0 */6 * * *", counting_job(counter.clone()))
            .unwrap();
        scheduler
            .register("five-field", "*/5 * * * *", counting_job(counter.clone()))
            .unwrap();

        let err = scheduler
            .register("cost-sync", "0 0 1 * * *", counting_job(counter.clone()))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateJob(_)));
        assert_eq!(err.kind(), ErrorKind::Duplicate);

        let err = scheduler
            .register("broken", "every tuesday", counting_job(counter))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert_eq!(scheduler.job_names(), vec!["cost-sync", "five-field"]);
        assert!(scheduler.jobs().iter().all(|j| j.next_run.is_some()));
    }

    #[tokio::test]
    async fn test_run_now_outcomes() {
        let scheduler = Scheduler::default();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register("ok", "0 0 1 * * *", counting_job(counter.clone()))
            .unwrap();
        scheduler
            .register("failing", "0 0 1 * * *", |_ctx| async {
                Err(Error::Other("boom".into()))
            })
            .unwrap();

        assert_eq!(scheduler.run_now("ok").await.unwrap(), RunOutcome::Completed);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(
            scheduler.run_now("failing").await.unwrap(),
            RunOutcome::Failed("boom".into())
        );
        let err = scheduler.run_now("missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_poison_scheduler() {
        let scheduler = Scheduler::default();
        scheduler
            .register("panics", "0 0 1 * * *", |_ctx| async {
                panic!("job exploded");
            })
            .unwrap();

        let first = scheduler.run_now("panics").await.unwrap();
        assert!(matches!(first, RunOutcome::Failed(_)));
        // The running flag was released by the guard.
        let second = scheduler.run_now("panics").await.unwrap();
        assert!(matches!(second, RunOutcome::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out() {
        let scheduler = Scheduler::new(SchedulerConfig {
            max_concurrent_runs: 1,
            run_timeout: Duration::from_secs(60),
        });
        scheduler
            .register("slow", "0 0 1 * * *", |_ctx| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .unwrap();

        assert_eq!(scheduler.run_now("slow").await.unwrap(), RunOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_overlapping_run_is_skipped() {
        let scheduler = Scheduler::default();
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        {
            let entered = entered.clone();
            let release = release.clone();
            scheduler
                .register("blocking", "0 0 1 * * *", move |_ctx| {
                    let entered = entered.clone();
                    let release = release.clone();
                    async move {
                        entered.notify_one();
                        release.notified().await;
                        Ok(())
                    }
                })
                .unwrap();
        }

        let background = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_now("blocking").await })
        };
        entered.notified().await;

        assert_eq!(scheduler.run_now("blocking").await.unwrap(), RunOutcome::Skipped);
        release.notify_one();
        assert_eq!(background.await.unwrap().unwrap(), RunOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_dispatches_on_occurrences() {
        let scheduler = Scheduler::default();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register("every-10s", "*/10 * * * * *", counting_job(counter.clone()))
            .unwrap();
        scheduler.start().unwrap();
        assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyStarted)));

        tokio::time::sleep(Duration::from_secs(35)).await;
        scheduler.stop().await;

        let runs = counter.load(Ordering::SeqCst);
        assert!((3..=4).contains(&runs), "unexpected run count {}", runs);
    }

    #[tokio::test]
    async fn test_stop_cancels_in_flight_runs() {
        let scheduler = Scheduler::default();
        let entered = Arc::new(Notify::new());
        {
            let entered = entered.clone();
            scheduler
                .register("forever", "0 0 1 * * *", move |ctx| {
                    let entered = entered.clone();
                    async move {
                        entered.notify_one();
                        ctx.cancel.cancelled().await;
                        Ok(())
                    }
                })
                .unwrap();
        }

        let background = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_now("forever").await })
        };
        entered.notified().await;
        scheduler.stop().await;

        assert_eq!(background.await.unwrap().unwrap(), RunOutcome::Cancelled);
        assert!(scheduler.register("late", "0 0 1 * * *", |_ctx| async { Ok(()) }).is_err());
    }
}
