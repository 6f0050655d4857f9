//! Job scheduler
//!
//! Owns every deferred or background job for its lifetime. Jobs live in
//! memory; external readers only ever see cloned snapshots. A single
//! cooperative dispatch loop wakes about once a second, moves due jobs
//! `pending → running`, and hands each one to its type-appropriate handler
//! on its own task so a slow job never stalls the loop.
//!
//! Handler errors are recorded on the job and published as a `failed`
//! status update; they never terminate the loop. A panic inside the tick
//! itself is caught, logged, and followed by a 5 s backoff.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use cascade_core::{Job, JobStatus, JobStatusUpdate, JobType, WorkflowDefinition};
use cascade_storage::{Cache, ExecutionStore};

use crate::actions::ActionRegistry;
use crate::bus::EventBus;
use crate::executor::WorkflowExecutor;
use crate::mail::Mailer;

const DEFINITION_CACHE_TTL: Duration = Duration::from_secs(3600);

pub type JobFuture = BoxFuture<'static, Result<Value, String>>;

/// Asynchronous bound function for `delay` / `http_request` / `generic`
/// jobs; receives the job payload.
pub type AsyncJobFn = Arc<dyn Fn(Value) -> JobFuture + Send + Sync>;

/// Synchronous bound function; offloaded to the blocking worker pool so the
/// dispatch loop is never blocked.
pub type BlockingJobFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

#[derive(Clone)]
pub enum BoundFn {
    Async(AsyncJobFn),
    Blocking(BlockingJobFn),
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Dispatch loop wake interval
    pub tick_interval: Duration,

    /// How long completed/failed jobs stay in memory
    pub retention: Duration,

    /// Pause after a tick failure
    pub error_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            retention: Duration::from_secs(24 * 3600),
            error_backoff: Duration::from_secs(5),
        }
    }
}

struct JobEntry {
    job: Job,
    func: Option<BoundFn>,
}

struct SchedulerInner {
    jobs: Mutex<HashMap<Uuid, JobEntry>>,
    config: SchedulerConfig,
    store: Arc<dyn ExecutionStore>,
    cache: Arc<dyn Cache>,
    registry: Arc<ActionRegistry>,
    bus: Arc<EventBus>,
    mailer: Arc<dyn Mailer>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    started: AtomicBool,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

/// In-memory job scheduler with a background dispatch loop.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        cache: Arc<dyn Cache>,
        registry: Arc<ActionRegistry>,
        bus: Arc<EventBus>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self::with_config(store, cache, registry, bus, mailer, SchedulerConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn ExecutionStore>,
        cache: Arc<dyn Cache>,
        registry: Arc<ActionRegistry>,
        bus: Arc<EventBus>,
        mailer: Arc<dyn Mailer>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            inner: Arc::new(SchedulerInner {
                jobs: Mutex::new(HashMap::new()),
                config,
                store,
                cache,
                registry,
                bus,
                mailer,
                shutdown_tx,
                shutdown_rx,
                started: AtomicBool::new(false),
                loop_handle: Mutex::new(None),
            }),
        }
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Enqueue a job; publishes a `pending` status update when a user is
    /// bound.
    #[instrument(skip(self, payload), fields(%job_type))]
    pub async fn schedule(
        &self,
        job_type: JobType,
        scheduled_at: DateTime<Utc>,
        payload: Value,
        user_id: Option<Uuid>,
    ) -> Uuid {
        self.schedule_entry(job_type, scheduled_at, payload, user_id, None)
            .await
    }

    /// Enqueue a job with a bound function for the scheduler to invoke on
    /// dispatch.
    pub async fn schedule_with_fn(
        &self,
        job_type: JobType,
        scheduled_at: DateTime<Utc>,
        payload: Value,
        user_id: Option<Uuid>,
        func: BoundFn,
    ) -> Uuid {
        self.schedule_entry(job_type, scheduled_at, payload, user_id, Some(func))
            .await
    }

    /// Enqueue a workflow run. With `execution_id` set, the executor is
    /// bound to that existing record; otherwise a fresh execution is
    /// created at dispatch time.
    pub async fn schedule_workflow_execution(
        &self,
        workflow_id: Uuid,
        execution_id: Option<Uuid>,
        scheduled_at: Option<DateTime<Utc>>,
        user_id: Option<Uuid>,
    ) -> Uuid {
        self.schedule(
            JobType::WorkflowExecution,
            scheduled_at.unwrap_or_else(Utc::now),
            json!({"workflow_id": workflow_id, "execution_id": execution_id}),
            user_id,
        )
        .await
    }

    /// Enqueue a standalone e-mail send.
    pub async fn schedule_email_send(
        &self,
        email: Value,
        scheduled_at: Option<DateTime<Utc>>,
        user_id: Option<Uuid>,
    ) -> Uuid {
        self.schedule(
            JobType::EmailSend,
            scheduled_at.unwrap_or_else(Utc::now),
            email,
            user_id,
        )
        .await
    }

    /// Enqueue a standalone delay.
    pub async fn schedule_delay(
        &self,
        seconds: u64,
        scheduled_at: Option<DateTime<Utc>>,
        user_id: Option<Uuid>,
    ) -> Uuid {
        let func: AsyncJobFn = Arc::new(|payload: Value| {
            async move {
                let seconds = payload.get("seconds").and_then(Value::as_u64).unwrap_or(1);
                tokio::time::sleep(Duration::from_secs(seconds)).await;
                Ok(json!({"slept_seconds": seconds}))
            }
            .boxed()
        });
        self.schedule_with_fn(
            JobType::Delay,
            scheduled_at.unwrap_or_else(Utc::now),
            json!({"seconds": seconds}),
            user_id,
            BoundFn::Async(func),
        )
        .await
    }

    async fn schedule_entry(
        &self,
        job_type: JobType,
        scheduled_at: DateTime<Utc>,
        payload: Value,
        user_id: Option<Uuid>,
        func: Option<BoundFn>,
    ) -> Uuid {
        let job = Job::new(job_type, scheduled_at, payload, user_id);
        let job_id = job.id;

        // Publish before the job becomes visible to the dispatch loop so
        // the `pending` update always precedes `running`
        if user_id.is_some() {
            self.publish_update(&job).await;
        }
        self.inner
            .jobs
            .lock()
            .insert(job_id, JobEntry { job, func });

        info!(%job_id, %job_type, %scheduled_at, "scheduled job");
        job_id
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Snapshot of a job by id.
    pub fn get(&self, job_id: Uuid) -> Option<Job> {
        self.inner.jobs.lock().get(&job_id).map(|e| e.job.clone())
    }

    /// Cancel a pending job. Running and terminal jobs are untouched.
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        let cancelled = {
            let mut jobs = self.inner.jobs.lock();
            match jobs.get_mut(&job_id) {
                Some(entry) => {
                    if entry.job.mark_cancelled() {
                        Some(entry.job.clone())
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        match cancelled {
            Some(job) => {
                info!(%job_id, "cancelled job");
                self.publish_update(&job).await;
                true
            }
            None => false,
        }
    }

    /// All jobs of one user, newest first.
    pub fn list_by_user(&self, user_id: Uuid) -> Vec<Job> {
        self.collect(|job| job.user_id == Some(user_id))
    }

    /// Pending and running jobs.
    pub fn list_active(&self) -> Vec<Job> {
        self.collect(|job| job.status.is_active())
    }

    /// All jobs of one type.
    pub fn list_by_type(&self, job_type: JobType) -> Vec<Job> {
        self.collect(|job| job.job_type == job_type)
    }

    fn collect(&self, filter: impl Fn(&Job) -> bool) -> Vec<Job> {
        let jobs = self.inner.jobs.lock();
        let mut result: Vec<Job> = jobs
            .values()
            .map(|e| &e.job)
            .filter(|j| filter(j))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.id.cmp(&a.id));
        result
    }

    // =========================================================================
    // Dispatch loop
    // =========================================================================

    /// Start the background dispatch loop. Idempotent.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let scheduler = self.clone();
        let mut shutdown_rx = self.inner.shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            info!("job scheduler started");
            let mut ticker = tokio::time::interval(scheduler.inner.config.tick_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let tick = std::panic::AssertUnwindSafe(scheduler.tick()).catch_unwind();
                        if tick.await.is_err() {
                            error!("scheduler tick panicked; backing off");
                            tokio::time::sleep(scheduler.inner.config.error_backoff).await;
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("job scheduler stopped");
        });

        *self.inner.loop_handle.lock() = Some(handle);
    }

    /// Signal the loop to stop and wait for it to wind down. In-flight job
    /// tasks run to completion.
    pub async fn stop(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        let handle = self.inner.loop_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.inner.started.store(false, Ordering::SeqCst);
    }

    /// One dispatch cycle: start every due job and evict expired ones.
    pub async fn tick(&self) {
        self.dispatch_due().await;
        self.evict_expired();
    }

    async fn dispatch_due(&self) {
        let now = Utc::now();
        let due: Vec<Job> = {
            let mut jobs = self.inner.jobs.lock();
            jobs.values_mut()
                .filter(|entry| entry.job.is_due(now))
                .filter_map(|entry| entry.job.mark_running().then(|| entry.job.clone()))
                .collect()
        };

        for job in due {
            self.publish_update(&job).await;
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.execute(job).await;
            });
        }
    }

    async fn execute(&self, job: Job) {
        let job_id = job.id;
        let result = self.run_job(&job).await;

        let finished = {
            let mut jobs = self.inner.jobs.lock();
            let Some(entry) = jobs.get_mut(&job_id) else {
                return;
            };
            match result {
                Ok(value) => {
                    entry.job.mark_completed(Some(value));
                }
                Err(ref message) => {
                    warn!(%job_id, "job failed: {message}");
                    entry.job.mark_failed(message.clone());
                }
            }
            entry.job.clone()
        };

        self.publish_update(&finished).await;
        if let Some(user_id) = finished.user_id {
            let jobs = self.list_by_user(user_id);
            self.inner.bus.publish_job_list(user_id, &jobs).await;
        }
    }

    async fn run_job(&self, job: &Job) -> Result<Value, String> {
        match job.job_type {
            JobType::WorkflowExecution => self.run_workflow_job(job).await,
            JobType::EmailSend => self.run_email_job(job).await,
            JobType::Delay | JobType::HttpRequest | JobType::Generic => {
                self.run_bound_job(job).await
            }
        }
    }

    async fn run_workflow_job(&self, job: &Job) -> Result<Value, String> {
        let workflow_id = job
            .payload
            .get("workflow_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or("workflow_execution job missing workflow_id")?;

        let definition = self.load_definition(workflow_id).await?;

        let execution = match job
            .payload
            .get("execution_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
        {
            Some(execution_id) => self
                .inner
                .store
                .get_execution(execution_id)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("execution not found: {execution_id}"))?,
            None => self
                .inner
                .store
                .create_execution(workflow_id, json!({}))
                .await
                .map_err(|e| e.to_string())?,
        };

        let executor = WorkflowExecutor::new(
            self.inner.store.clone(),
            self.inner.registry.clone(),
            self.inner.bus.clone(),
        );
        let initial_context = execution.trigger_data.clone();
        let finished = executor
            .run(&definition, execution, initial_context)
            .await
            .map_err(|e| e.to_string())?;

        let last_key = format!("workflow:{workflow_id}:last_execution");
        let last = serde_json::to_value(&finished).unwrap_or(Value::Null);
        if let Err(e) = self
            .inner
            .cache
            .set_json(&last_key, &last, Some(DEFINITION_CACHE_TTL))
            .await
        {
            warn!(%workflow_id, "failed to memoize last execution: {}", e);
        }

        Ok(json!({"execution_id": finished.id, "status": finished.status}))
    }

    async fn run_email_job(&self, job: &Job) -> Result<Value, String> {
        let to = job
            .payload
            .get("to")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if to.is_empty() {
            return Err("email job missing 'to' address".to_string());
        }
        let subject = job
            .payload
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let body = job
            .payload
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let execution_id = job
            .payload
            .get("execution_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok());
        let step_id = job.payload.get("step_id").and_then(Value::as_str);

        let receipt = self
            .inner
            .mailer
            .send_email(to, subject, body, execution_id, step_id)
            .await;

        if receipt.success {
            Ok(json!({"success": true, "email_id": receipt.email_id}))
        } else {
            Err(receipt
                .error
                .unwrap_or_else(|| "email delivery failed".to_string()))
        }
    }

    async fn run_bound_job(&self, job: &Job) -> Result<Value, String> {
        let func = self
            .inner
            .jobs
            .lock()
            .get(&job.id)
            .and_then(|entry| entry.func.clone());

        match func {
            Some(BoundFn::Async(f)) => f(job.payload.clone()).await,
            Some(BoundFn::Blocking(f)) => {
                let payload = job.payload.clone();
                tokio::task::spawn_blocking(move || f(payload))
                    .await
                    .map_err(|e| format!("worker pool task failed: {e}"))?
            }
            None => Err("no bound function for job".to_string()),
        }
    }

    async fn load_definition(&self, workflow_id: Uuid) -> Result<WorkflowDefinition, String> {
        let key = format!("workflow:{workflow_id}");
        if let Ok(Some(cached)) = self.inner.cache.get_json(&key).await {
            if let Some(definition) = cached
                .get("definition")
                .and_then(|d| serde_json::from_value(d.clone()).ok())
            {
                return Ok(definition);
            }
        }

        let stored = self
            .inner
            .store
            .get_workflow(workflow_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("workflow not found: {workflow_id}"))?;

        let cached = json!({"name": stored.name, "definition": stored.definition});
        if let Err(e) = self
            .inner
            .cache
            .set_json(&key, &cached, Some(DEFINITION_CACHE_TTL))
            .await
        {
            warn!(%workflow_id, "failed to cache workflow definition: {}", e);
        }
        Ok(stored.definition)
    }

    fn evict_expired(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.inner.config.retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        self.inner.jobs.lock().retain(|_, entry| {
            let expired = matches!(
                entry.job.status,
                JobStatus::Completed | JobStatus::Failed
            ) && entry
                .job
                .finished_at()
                .map(|t| t < cutoff)
                .unwrap_or(false);
            !expired
        });
    }

    async fn publish_update(&self, job: &Job) {
        let update = JobStatusUpdate::from_job(job);
        self.inner.bus.publish_job_update(&update).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionDeps;
    use crate::mail::MemoryMailer;
    use crate::realtime::NoopBridge;
    use cascade_storage::{MemoryCache, MemoryExecutionStore};
    use cascade_core::ExecutionStatus;

    struct Harness {
        scheduler: JobScheduler,
        store: Arc<MemoryExecutionStore>,
        cache: Arc<MemoryCache>,
        mailer: Arc<MemoryMailer>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryExecutionStore::new());
        let cache = Arc::new(MemoryCache::new());
        let mailer = Arc::new(MemoryMailer::new(cache.clone()));
        let registry = Arc::new(ActionRegistry::with_builtins(ActionDeps {
            http: reqwest::Client::new(),
            mailer: mailer.clone(),
        }));
        let bus = Arc::new(EventBus::new(Arc::new(NoopBridge)));
        let scheduler = JobScheduler::new(
            store.clone(),
            cache.clone(),
            registry,
            bus,
            mailer.clone(),
        );
        Harness {
            scheduler,
            store,
            cache,
            mailer,
        }
    }

    async fn wait_for_terminal(scheduler: &JobScheduler, job_id: Uuid) -> Job {
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                if let Some(job) = scheduler.get(job_id) {
                    if job.status.is_terminal() {
                        return job;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("job reached a terminal status")
    }

    #[tokio::test]
    async fn test_schedule_and_get_snapshot() {
        let h = harness();
        let job_id = h
            .scheduler
            .schedule(JobType::Generic, Utc::now(), json!({"k": 1}), None)
            .await;

        let job = h.scheduler.get(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.payload, json!({"k": 1}));
        assert!(h.scheduler.get(Uuid::now_v7()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_job_runs_to_completion() {
        let h = harness();
        let scheduled_at = Utc::now();
        let job_id = h.scheduler.schedule_delay(1, Some(scheduled_at), None).await;

        h.scheduler.tick().await;
        let job = wait_for_terminal(&h.scheduler, job_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"slept_seconds": 1})));
        assert!(job.started_at.unwrap() >= scheduled_at);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_future_job_is_not_dispatched_and_cancels() {
        let h = harness();
        let job_id = h
            .scheduler
            .schedule(
                JobType::Generic,
                Utc::now() + chrono::Duration::seconds(60),
                json!({}),
                None,
            )
            .await;

        h.scheduler.tick().await;
        assert_eq!(h.scheduler.get(job_id).unwrap().status, JobStatus::Pending);

        assert!(h.scheduler.cancel(job_id).await);
        let job = h.scheduler.get(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.cancelled_at.is_some());

        // The dispatch loop never resurrects it
        h.scheduler.tick().await;
        assert_eq!(
            h.scheduler.get(job_id).unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_running_job_is_rejected() {
        let h = harness();
        let func: AsyncJobFn = Arc::new(|_payload: Value| {
            async {
                futures::future::pending::<()>().await;
                Ok(Value::Null)
            }
            .boxed()
        });
        let job_id = h
            .scheduler
            .schedule_with_fn(
                JobType::Generic,
                Utc::now(),
                json!({}),
                None,
                BoundFn::Async(func),
            )
            .await;

        h.scheduler.tick().await;
        tokio::task::yield_now().await;
        assert_eq!(h.scheduler.get(job_id).unwrap().status, JobStatus::Running);

        assert!(!h.scheduler.cancel(job_id).await);
        assert_eq!(h.scheduler.get(job_id).unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_email_job_failure_is_recorded() {
        let h = harness();
        h.mailer.fail_sends(true);

        let job_id = h
            .scheduler
            .schedule_email_send(
                json!({"to": "a@b.c", "subject": "s", "body": "b"}),
                None,
                None,
            )
            .await;

        h.scheduler.tick().await;
        let job = wait_for_terminal(&h.scheduler, job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.is_some());
        assert!(job.failed_at.is_some());
    }

    #[tokio::test]
    async fn test_email_job_delivers() {
        let h = harness();
        let job_id = h
            .scheduler
            .schedule_email_send(
                json!({"to": "a@b.c", "subject": "s", "body": "b"}),
                None,
                None,
            )
            .await;

        h.scheduler.tick().await;
        let job = wait_for_terminal(&h.scheduler, job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(h.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_workflow_job_runs_and_memoizes() {
        let h = harness();
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "nodes": [
                {"id": "start", "type": "start", "action": "notify"},
                {"id": "n1", "action": "notify"}
            ],
            "edges": [{"source": "start", "target": "n1"}]
        }))
        .unwrap();
        let workflow = h
            .store
            .create_workflow(Uuid::now_v7(), "wf", &definition)
            .await
            .unwrap();
        let execution = h
            .store
            .create_execution(workflow.id, json!({}))
            .await
            .unwrap();

        let job_id = h
            .scheduler
            .schedule_workflow_execution(workflow.id, Some(execution.id), None, None)
            .await;

        h.scheduler.tick().await;
        let job = wait_for_terminal(&h.scheduler, job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_ref().unwrap()["status"], "succeeded");

        let stored = h.store.get_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Succeeded);

        let memoized = h
            .cache
            .get_json(&format!("workflow:{}:last_execution", workflow.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(memoized["status"], "succeeded");

        // The definition got memoized on first load
        assert!(h
            .cache
            .get_json(&format!("workflow:{}", workflow.id))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_missing_workflow_fails_job() {
        let h = harness();
        let job_id = h
            .scheduler
            .schedule_workflow_execution(Uuid::now_v7(), None, None, None)
            .await;

        h.scheduler.tick().await;
        let job = wait_for_terminal(&h.scheduler, job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("workflow not found"));
    }

    #[tokio::test]
    async fn test_user_scoped_and_type_queries() {
        let h = harness();
        let alice = Uuid::now_v7();
        let bob = Uuid::now_v7();

        let a1 = h
            .scheduler
            .schedule(JobType::Generic, Utc::now() + chrono::Duration::seconds(60), json!({}), Some(alice))
            .await;
        let _b1 = h
            .scheduler
            .schedule(JobType::EmailSend, Utc::now() + chrono::Duration::seconds(60), json!({}), Some(bob))
            .await;
        let a2 = h
            .scheduler
            .schedule(JobType::Delay, Utc::now() + chrono::Duration::seconds(60), json!({}), Some(alice))
            .await;

        let alices = h.scheduler.list_by_user(alice);
        assert_eq!(alices.len(), 2);
        // Newest first
        assert_eq!(alices[0].id, a2);
        assert_eq!(alices[1].id, a1);

        assert_eq!(h.scheduler.list_by_type(JobType::EmailSend).len(), 1);
        assert_eq!(h.scheduler.list_active().len(), 3);

        h.scheduler.cancel(a1).await;
        assert_eq!(h.scheduler.list_active().len(), 2);
    }

    #[tokio::test]
    async fn test_retention_evicts_old_terminal_jobs() {
        let h = harness();
        let job_id = h
            .scheduler
            .schedule_email_send(json!({"to": "a@b.c"}), None, None)
            .await;
        h.scheduler.tick().await;
        wait_for_terminal(&h.scheduler, job_id).await;

        // Fresh terminal jobs survive the sweep
        h.scheduler.tick().await;
        assert!(h.scheduler.get(job_id).is_some());

        // Backdate the completion past the retention window
        {
            let mut jobs = h.scheduler.inner.jobs.lock();
            let entry = jobs.get_mut(&job_id).unwrap();
            entry.job.completed_at = Some(Utc::now() - chrono::Duration::hours(25));
        }
        h.scheduler.tick().await;
        assert!(h.scheduler.get(job_id).is_none());
    }

    #[tokio::test]
    async fn test_cancelled_jobs_survive_retention() {
        let h = harness();
        let job_id = h
            .scheduler
            .schedule(
                JobType::Generic,
                Utc::now() + chrono::Duration::seconds(60),
                json!({}),
                None,
            )
            .await;
        h.scheduler.cancel(job_id).await;

        {
            let mut jobs = h.scheduler.inner.jobs.lock();
            jobs.get_mut(&job_id).unwrap().job.cancelled_at =
                Some(Utc::now() - chrono::Duration::hours(48));
        }
        h.scheduler.tick().await;
        assert!(h.scheduler.get(job_id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_dispatches() {
        let h = harness();
        h.scheduler.start();
        // Starting twice is a no-op
        h.scheduler.start();

        let job_id = h.scheduler.schedule_delay(1, None, None).await;
        let job = wait_for_terminal(&h.scheduler, job_id).await;
        assert_eq!(job.status, JobStatus::Completed);

        h.scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_blocking_fn_offloaded() {
        let h = harness();
        let func: BlockingJobFn = Arc::new(|payload: Value| {
            let n = payload.get("n").and_then(Value::as_u64).unwrap_or(0);
            Ok(json!({"doubled": n * 2}))
        });
        let job_id = h
            .scheduler
            .schedule_with_fn(
                JobType::Generic,
                Utc::now(),
                json!({"n": 21}),
                None,
                BoundFn::Blocking(func),
            )
            .await;

        h.scheduler.tick().await;
        let job = wait_for_terminal(&h.scheduler, job_id).await;
        assert_eq!(job.result, Some(json!({"doubled": 42})));
    }

    #[tokio::test]
    async fn test_bound_job_without_fn_fails() {
        let h = harness();
        let job_id = h
            .scheduler
            .schedule(JobType::Generic, Utc::now(), json!({}), None)
            .await;

        h.scheduler.tick().await;
        let job = wait_for_terminal(&h.scheduler, job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("no bound function for job"));
    }
}
