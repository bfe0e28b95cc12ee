//! Job registry
//!
//! Every registered job owns a timer task on the shared tokio runtime. When
//! the trigger fires, the job's handler runs on one of two executor pools
//! modelled as semaphores. At most one run per job id is in flight; a fire
//! time that arrives while the previous run is still going is skipped, so
//! missed fire times collapse into a single run.
//!
//! Re-registering an id swaps trigger, handler and arguments in place. The
//! timer task picks the new configuration up through a `watch` channel and
//! the per-job run state (run count, last run, running flag) carries over.

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio::task::JoinHandle;

use super::error::{SchedulerError, SchedulerResult};
use super::schedule::{JobId, ScheduleStore};
use super::trigger::{duration_until, CronTrigger};
use crate::utils::write_json_atomic;

// ============================================================================
// Job Kinds & Arguments
// ============================================================================

/// Kind of work a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    DailyMaintenance,
    Preprocess,
    MovieInfoCrawl,
    CommentCrawl,
}

impl JobKind {
    /// Label used in logs and snapshots
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DailyMaintenance => "daily_maintenance",
            Self::Preprocess => "preprocess",
            Self::MovieInfoCrawl => "movie_info_crawl",
            Self::CommentCrawl => "comment_crawl",
        }
    }

    /// Executor pool the kind runs on
    pub fn default_executor(&self) -> ExecutorKind {
        match self {
            Self::Preprocess => ExecutorKind::Heavy,
            _ => ExecutorKind::Default,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed arguments bound to a job at schedule time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobArgs {
    /// Target title for per-movie jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movie_id: Option<u64>,

    /// Comment count recorded by the last completed crawl
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_count: Option<u64>,
}

impl JobArgs {
    /// Arguments of a comment crawl job
    pub fn comment_crawl(movie_id: u64, previous_count: u64) -> Self {
        Self {
            movie_id: Some(movie_id),
            previous_count: Some(previous_count),
        }
    }
}

/// Work executed when a job fires
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job_id: &str, args: &JobArgs) -> anyhow::Result<()>;
}

/// Everything needed to register one job apart from its trigger
#[derive(Clone)]
pub struct JobBinding {
    pub kind: JobKind,
    pub handler: Arc<dyn JobHandler>,
    pub args: JobArgs,
    pub executor: ExecutorKind,
}

impl fmt::Debug for JobBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobBinding")
            .field("kind", &self.kind)
            .field("args", &self.args)
            .field("executor", &self.executor)
            .finish()
    }
}

/// Resolves a job id to its callable and arguments
#[async_trait]
pub trait JobResolver: Send + Sync {
    async fn resolve(&self, job_id: &str) -> Option<JobBinding>;
}

// ============================================================================
// Executor Pools
// ============================================================================

/// Executor class a job runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// High concurrency, for frequent small jobs
    #[default]
    Default,
    /// Low concurrency, reserved for infrequent heavy jobs
    Heavy,
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Heavy => write!(f, "heavy"),
        }
    }
}

/// Concurrency limits of the two executor classes
#[derive(Debug)]
pub struct ExecutorPools {
    default: Arc<Semaphore>,
    heavy: Arc<Semaphore>,
}

impl ExecutorPools {
    pub fn new(default_size: usize, heavy_size: usize) -> Self {
        Self {
            default: Arc::new(Semaphore::new(default_size.max(1))),
            heavy: Arc::new(Semaphore::new(heavy_size.max(1))),
        }
    }

    fn pool(&self, kind: ExecutorKind) -> Arc<Semaphore> {
        match kind {
            ExecutorKind::Default => Arc::clone(&self.default),
            ExecutorKind::Heavy => Arc::clone(&self.heavy),
        }
    }

    /// Free permits of a pool
    pub fn available(&self, kind: ExecutorKind) -> usize {
        self.pool(kind).available_permits()
    }

    fn close(&self) {
        self.default.close();
        self.heavy.close();
    }
}

impl Default for ExecutorPools {
    fn default() -> Self {
        Self::new(500, 50)
    }
}

// ============================================================================
// Job Specification & State
// ============================================================================

/// A complete registration request
#[derive(Clone, Debug)]
pub struct JobSpec {
    pub id: JobId,
    pub trigger: CronTrigger,
    pub binding: JobBinding,
}

impl JobSpec {
    pub fn new(id: impl Into<JobId>, trigger: CronTrigger, binding: JobBinding) -> Self {
        Self {
            id: id.into(),
            trigger,
            binding,
        }
    }
}

/// Run state that survives replacement
#[derive(Debug, Default)]
struct RunState {
    running: AtomicBool,
    run_count: AtomicU64,
    /// Unix seconds of the last completed run, 0 if never
    last_run: AtomicI64,
}

struct Registration {
    kind: JobKind,
    config_tx: watch::Sender<JobSpec>,
    state: Arc<RunState>,
    timer: JoinHandle<()>,
}

/// What [`JobRegistry::register`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Added,
    Replaced,
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<JobId>,
    pub replaced: Vec<JobId>,
    pub removed: Vec<JobId>,
    pub failed: Vec<(JobId, String)>,
}

/// One row of the advisory registry snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub trigger: String,
    pub executor: ExecutorKind,
    pub next_run_time: Option<String>,
    pub last_run_time: Option<String>,
    pub run_count: u64,
}

// ============================================================================
// Job Registry
// ============================================================================

/// Set of scheduled recurring executions
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Registration>>,
    pools: Arc<ExecutorPools>,
    jitter_secs: u64,
    snapshot_path: Option<PathBuf>,
    shutdown_tx: watch::Sender<bool>,
}

impl JobRegistry {
    /// Create a registry; jobs start when registered
    pub fn new(pools: ExecutorPools, jitter_secs: u64) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            jobs: RwLock::new(HashMap::new()),
            pools: Arc::new(pools),
            jitter_secs,
            snapshot_path: None,
            shutdown_tx,
        }
    }

    /// Write a snapshot here after every reconciliation
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn pools(&self) -> &ExecutorPools {
        &self.pools
    }

    pub fn jitter_secs(&self) -> u64 {
        self.jitter_secs
    }

    pub async fn contains(&self, job_id: &str) -> bool {
        self.jobs.read().await.contains_key(job_id)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Registered ids of one kind
    pub async fn job_ids(&self, kind: JobKind) -> BTreeSet<JobId> {
        self.jobs
            .read()
            .await
            .iter()
            .filter(|(_, reg)| reg.kind == kind)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of completed runs of a job
    pub async fn run_count(&self, job_id: &str) -> Option<u64> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|reg| reg.state.run_count.load(Ordering::SeqCst))
    }

    /// Current trigger of a job
    pub async fn trigger_of(&self, job_id: &str) -> Option<CronTrigger> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|reg| reg.config_tx.borrow().trigger)
    }

    /// Current arguments of a job
    pub async fn args_of(&self, job_id: &str) -> Option<JobArgs> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|reg| reg.config_tx.borrow().binding.args.clone())
    }

    /// Add a job or replace the existing registration with the same id
    pub async fn register(&self, spec: JobSpec) -> SchedulerResult<RegisterOutcome> {
        if *self.shutdown_tx.borrow() {
            return Err(SchedulerError::registration(&spec.id, "registry is shut down"));
        }
        if spec.trigger.next_fire_after(&Local::now()).is_none() {
            return Err(SchedulerError::registration(
                &spec.id,
                format!("trigger {} never fires", spec.trigger.describe()),
            ));
        }

        let job_id = spec.id.clone();
        let kind = spec.binding.kind;
        let mut jobs = self.jobs.write().await;

        if let Some(existing) = jobs.get_mut(&job_id) {
            existing.kind = kind;
            if existing.config_tx.send(spec.clone()).is_err() || existing.timer.is_finished() {
                // Timer is gone; start a fresh one that shares the old run state.
                existing.timer.abort();
                let (config_tx, timer) = self.spawn_timer(spec, Arc::clone(&existing.state));
                existing.config_tx = config_tx;
                existing.timer = timer;
            }
            tracing::debug!(job_id = %job_id, kind = %kind, "Job registration replaced");
            return Ok(RegisterOutcome::Replaced);
        }

        let state = Arc::new(RunState::default());
        let (config_tx, timer) = self.spawn_timer(spec, Arc::clone(&state));
        jobs.insert(
            job_id.clone(),
            Registration {
                kind,
                config_tx,
                state,
                timer,
            },
        );
        tracing::debug!(job_id = %job_id, kind = %kind, "Job registered");
        Ok(RegisterOutcome::Added)
    }

    /// Remove a job; an in-flight run is left to finish
    pub async fn remove(&self, job_id: &str) -> SchedulerResult<()> {
        let removed = self.jobs.write().await.remove(job_id);
        match removed {
            Some(reg) => {
                reg.timer.abort();
                tracing::debug!(job_id = %job_id, "Job removed");
                Ok(())
            }
            None => Err(SchedulerError::JobNotFound {
                job_id: job_id.to_string(),
            }),
        }
    }

    /// Fire a job immediately, outside its trigger.
    ///
    /// Returns the handle of the started run, or `None` when a run of the
    /// same job is already in flight.
    pub async fn run_now(&self, job_id: &str) -> SchedulerResult<Option<JoinHandle<()>>> {
        let jobs = self.jobs.read().await;
        let reg = jobs.get(job_id).ok_or_else(|| SchedulerError::JobNotFound {
            job_id: job_id.to_string(),
        })?;
        let spec = reg.config_tx.borrow().clone();
        Ok(fire(spec, Arc::clone(&reg.state), Arc::clone(&self.pools)))
    }

    /// Make the registered jobs of `kind` match the schedule store.
    ///
    /// Every store row is registered with replace semantics, using the
    /// binding the resolver returns for it. Registered jobs of `kind` that
    /// have no row are removed. A failing id is logged and skipped; its
    /// previous registration stays in place.
    pub async fn reconcile(
        &self,
        store: &ScheduleStore,
        resolver: &dyn JobResolver,
        kind: JobKind,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for (job_id, descriptor) in store.iter() {
            let Some(binding) = resolver.resolve(job_id).await else {
                tracing::warn!(job_id = %job_id, operation = "reconcile", "No dispatch entry for job");
                report
                    .failed
                    .push((job_id.clone(), "no dispatch entry".to_string()));
                continue;
            };

            let trigger = CronTrigger::from_descriptor(descriptor).with_jitter(self.jitter_secs);
            match self.register(JobSpec::new(job_id.clone(), trigger, binding)).await {
                Ok(RegisterOutcome::Added) => report.added.push(job_id.clone()),
                Ok(RegisterOutcome::Replaced) => report.replaced.push(job_id.clone()),
                Err(e) => {
                    tracing::error!(job_id = %job_id, operation = "reconcile", error = %e, "Registration failed");
                    report.failed.push((job_id.clone(), e.to_string()));
                }
            }
        }

        for job_id in self.job_ids(kind).await {
            if store.contains(&job_id) {
                continue;
            }
            if self.remove(&job_id).await.is_ok() {
                report.removed.push(job_id);
            }
        }

        tracing::info!(
            kind = %kind,
            added = report.added.len(),
            replaced = report.replaced.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Registry reconciled"
        );

        if let Err(e) = self.persist_snapshot().await {
            tracing::warn!(operation = "persist_snapshot", error = %e, "Registry snapshot not written");
        }

        report
    }

    /// Describe every registered job, ordered by id
    pub async fn snapshot(&self) -> Vec<JobSnapshot> {
        let now = Local::now();
        let jobs = self.jobs.read().await;

        let mut rows: Vec<JobSnapshot> = jobs
            .iter()
            .map(|(id, reg)| {
                let trigger = reg.config_tx.borrow().trigger;
                let executor = reg.config_tx.borrow().binding.executor;
                let last_run = reg.state.last_run.load(Ordering::SeqCst);
                JobSnapshot {
                    id: id.clone(),
                    kind: reg.kind,
                    trigger: trigger.describe(),
                    executor,
                    next_run_time: trigger.next_fire_after(&now).map(|t| t.to_rfc3339()),
                    last_run_time: (last_run > 0)
                        .then(|| Local.timestamp_opt(last_run, 0).single())
                        .flatten()
                        .map(|t| t.to_rfc3339()),
                    run_count: reg.state.run_count.load(Ordering::SeqCst),
                }
            })
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    /// Write the snapshot if a path is configured
    pub async fn persist_snapshot(&self) -> SchedulerResult<Option<PathBuf>> {
        let Some(path) = &self.snapshot_path else {
            return Ok(None);
        };
        let rows = self.snapshot().await;
        write_json_atomic(path, &rows)
            .map_err(|e| SchedulerError::persistence("persist_snapshot", path, e))?;
        Ok(Some(path.clone()))
    }

    /// Stop every timer; in-flight runs finish on their own
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut jobs = self.jobs.write().await;
        for (_, reg) in jobs.drain() {
            reg.timer.abort();
        }
        self.pools.close();
        tracing::info!("Job registry shut down");
    }

    fn spawn_timer(
        &self,
        spec: JobSpec,
        state: Arc<RunState>,
    ) -> (watch::Sender<JobSpec>, JoinHandle<()>) {
        let (config_tx, config_rx) = watch::channel(spec);
        let timer = tokio::spawn(run_timer(
            config_rx,
            state,
            Arc::clone(&self.pools),
            self.shutdown_tx.subscribe(),
        ));
        (config_tx, timer)
    }
}

impl Drop for JobRegistry {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

// ============================================================================
// Timer Loop
// ============================================================================

async fn run_timer(
    mut config_rx: watch::Receiver<JobSpec>,
    state: Arc<RunState>,
    pools: Arc<ExecutorPools>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let spec = config_rx.borrow_and_update().clone();
        let now = Local::now();
        let Some(next) = spec.trigger.next_fire_after(&now) else {
            tracing::warn!(job_id = %spec.id, trigger = %spec.trigger.describe(), "Trigger has no future fire time");
            if config_rx.changed().await.is_err() {
                break;
            }
            continue;
        };
        let delay = duration_until(&now, &next) + spec.trigger.jitter();
        tracing::trace!(job_id = %spec.id, next_fire = %next, "Timer armed");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                fire(spec, Arc::clone(&state), Arc::clone(&pools));
            }
            changed = config_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            stopped = shutdown.changed() => {
                if stopped.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Start one run unless the previous one is still in flight
fn fire(spec: JobSpec, state: Arc<RunState>, pools: Arc<ExecutorPools>) -> Option<JoinHandle<()>> {
    if state.running.swap(true, Ordering::SeqCst) {
        tracing::warn!(job_id = %spec.id, "Previous run still in progress, fire time skipped");
        return None;
    }

    let semaphore = pools.pool(spec.binding.executor);
    Some(tokio::spawn(async move {
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(job_id = %spec.id, "Executor pool closed, run dropped");
                state.running.store(false, Ordering::SeqCst);
                return;
            }
        };

        let started: DateTime<Local> = Local::now();
        tracing::info!(job_id = %spec.id, kind = %spec.binding.kind, executor = %spec.binding.executor, "Job started");

        match spec.binding.handler.run(&spec.id, &spec.binding.args).await {
            Ok(()) => {
                let elapsed = Local::now().signed_duration_since(started);
                tracing::info!(job_id = %spec.id, elapsed_ms = elapsed.num_milliseconds(), "Job finished");
            }
            Err(e) => {
                tracing::error!(job_id = %spec.id, kind = %spec.binding.kind, error = %e, "Job failed");
            }
        }

        state.run_count.fetch_add(1, Ordering::SeqCst);
        state.last_run.store(Local::now().timestamp(), Ordering::SeqCst);
        state.running.store(false, Ordering::SeqCst);
    }))
}

// ============================================================================
// Tests
// ============================================================================
