//! Job registration and the per-firing execution pipeline

use crate::error::{CronError, ErrorGroup, Result};
use crate::guard::JobGuard;
use crate::store::CronStorage;
use crate::trigger::{CronTrigger, TriggerCallback, TriggerSource};
use crate::types::{CompleteHook, ErrorHook, ExecutionRecord, Job, JobStatus, WorkFn};
use chrono::Utc;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

/// In-process job scheduler.
///
/// Binds a trigger source to an optional storage backend under one logical
/// `source` identifier. Jobs are registered once, wrapped in a single-flight
/// [`JobGuard`], and fired by the trigger; every run drives the persisted
/// status through `running` and `done` and appends one [`ExecutionRecord`].
pub struct CronScheduler {
    source: String,
    trigger: Arc<dyn TriggerSource>,
    storage: Option<Arc<dyn CronStorage>>,
    // Coarse lock: registration is off the hot path, the duplicate-name check
    // and append must be atomic
    jobs: Mutex<Vec<RegisteredJob>>,
}

struct RegisteredJob {
    name: String,
    schedule: String,
    description: String,
    guard: Arc<JobGuard>,
}

/// Everything one firing needs, captured by the guard's pipeline closure
struct RunContext {
    source: String,
    name: String,
    schedule: String,
    description: String,
    work: WorkFn,
    on_complete: Option<CompleteHook>,
    on_error: Option<ErrorHook>,
    storage: Option<Arc<dyn CronStorage>>,
}

impl CronScheduler {
    /// Create a scheduler with the bundled [`CronTrigger`] and no storage
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            trigger: Arc::new(CronTrigger::new()),
            storage: None,
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Replace the trigger source
    pub fn with_trigger(mut self, trigger: Arc<dyn TriggerSource>) -> Self {
        self.trigger = trigger;
        self
    }

    /// Attach a storage backend for status and execution history
    pub fn with_storage(mut self, storage: Arc<dyn CronStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// The scheduler's logical source identifier
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Register a job.
    ///
    /// Validates the definition, writes the `initialized` status if storage is
    /// attached, installs the guarded callback with the trigger, and only then
    /// appends the job to the registry. A failure at any step leaves the
    /// scheduler exactly as it was; the job never fires.
    pub async fn register(&self, job: Job) -> Result<()> {
        if job.schedule.is_empty() {
            return Err(CronError::MissingSchedule);
        }
        if job.name.is_empty() {
            return Err(CronError::MissingJobName);
        }
        let Some(work) = job.work.clone() else {
            return Err(CronError::MissingWorkFn);
        };

        let mut jobs = self.jobs.lock().await;
        if jobs.iter().any(|j| j.name == job.name) {
            return Err(CronError::DuplicateJob(job.name));
        }

        if let Some(storage) = &self.storage {
            storage
                .register_job_status(
                    &self.source,
                    &job.name,
                    &job.schedule,
                    &job.description,
                    JobStatus::Initialized,
                    None,
                )
                .await?;
        }

        let ctx = Arc::new(RunContext {
            source: self.source.clone(),
            name: job.name.clone(),
            schedule: job.schedule.clone(),
            description: job.description.clone(),
            work,
            on_complete: job.on_complete.clone(),
            on_error: job.on_error.clone(),
            storage: self.storage.clone(),
        });
        let guard = Arc::new(JobGuard::new(&job.name, move || run_job(ctx.clone())));

        let callback: TriggerCallback = {
            let guard = guard.clone();
            Arc::new(move || {
                let guard = guard.clone();
                Box::pin(async move { guard.try_run().await })
                    as Pin<Box<dyn Future<Output = ()> + Send>>
            })
        };
        self.trigger.install(&job.schedule, callback)?;

        tracing::info!(
            source = %self.source,
            job = %job.name,
            schedule = %job.schedule,
            "registered job"
        );

        jobs.push(RegisteredJob {
            name: job.name,
            schedule: job.schedule,
            description: job.description,
            guard,
        });

        Ok(())
    }

    /// Begin dispatching registered jobs. Returns immediately; the caller
    /// keeps the process alive for as long as the scheduler should run.
    pub fn start(&self) {
        self.trigger.start();
        tracing::info!(source = %self.source, "scheduler started");
    }

    /// Mark every persisted job belonging to this scheduler's source as
    /// inactive. Advisory shutdown bookkeeping; a no-op without storage, and
    /// not synchronized against concurrently running jobs.
    pub async fn set_jobs_to_inactive(&self) -> Result<()> {
        match &self.storage {
            Some(storage) => storage.set_jobs_to_inactive(&self.source).await,
            None => {
                tracing::debug!(source = %self.source, "no storage attached, nothing to inactivate");
                Ok(())
            }
        }
    }

    /// Names of the registered jobs, in registration order
    pub async fn job_names(&self) -> Vec<String> {
        self.jobs.lock().await.iter().map(|j| j.name.clone()).collect()
    }

    /// Number of registered jobs
    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Firings dropped by the named job's guard so far, `None` for unknown
    /// jobs
    pub async fn skipped(&self, name: &str) -> Option<u64> {
        self.jobs
            .lock()
            .await
            .iter()
            .find(|j| j.name == name)
            .map(|j| j.guard.skipped())
    }

    /// Schedule expression of the named job, `None` for unknown jobs
    pub async fn schedule_of(&self, name: &str) -> Option<String> {
        self.jobs
            .lock()
            .await
            .iter()
            .find(|j| j.name == name)
            .map(|j| j.schedule.clone())
    }

    /// Description of the named job, `None` for unknown jobs
    pub async fn description_of(&self, name: &str) -> Option<String> {
        self.jobs
            .lock()
            .await
            .iter()
            .find(|j| j.name == name)
            .map(|j| j.description.clone())
    }
}

/// One firing of one job, executed entirely inside its guard's critical
/// section.
///
/// Persistence failures never stop the run; they accumulate and are logged at
/// the end. The work function's own error reaches the hooks and the persisted
/// record, never the caller.
async fn run_job(ctx: Arc<RunContext>) {
    let mut errors = ErrorGroup::new();
    let started_at = Utc::now();

    if let Some(storage) = &ctx.storage {
        if let Err(err) = storage
            .register_job_status(
                &ctx.source,
                &ctx.name,
                &ctx.schedule,
                &ctx.description,
                JobStatus::Running,
                None,
            )
            .await
        {
            errors.add(CronError::Storage(format!(
                "failed to set job {} to running: {}",
                ctx.name, err
            )));
        }
    }

    let outcome = (ctx.work)().await;

    if let Some(hook) = &ctx.on_complete {
        hook(outcome.as_ref().err());
    }
    if let Err(err) = &outcome {
        if let Some(hook) = &ctx.on_error {
            hook(err);
        }
    }

    let record = ExecutionRecord::new(&ctx.source, &ctx.name, started_at, outcome.as_ref().err());

    if let Some(storage) = &ctx.storage {
        if let Err(err) = storage.register_execution(&record).await {
            errors.add(CronError::Storage(format!(
                "failed to register execution of {}: {}",
                ctx.name, err
            )));
        }

        let last_error = outcome.as_ref().err().map(|e| e.to_string());
        if let Err(err) = storage
            .register_job_status(
                &ctx.source,
                &ctx.name,
                &ctx.schedule,
                &ctx.description,
                JobStatus::Done,
                last_error.as_deref(),
            )
            .await
        {
            errors.add(CronError::Storage(format!(
                "failed to set job {} to done: {}",
                ctx.name, err
            )));
        }
    }

    if let Some(errs) = errors.into_err() {
        tracing::error!(job = %ctx.name, "persistence failures during run: {}", errs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStorage;
    use crate::trigger::ManualTrigger;
    use crate::types::{BoxError, ExecutionFilter};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FailingStorage;

    #[async_trait]
    impl CronStorage for FailingStorage {
        async fn find_jobs(&self) -> Result<Vec<crate::types::JobRecord>> {
            Err(CronError::Storage("storage down".to_string()))
        }

        async fn register_job_status(
            &self,
            _source: &str,
            _name: &str,
            _schedule: &str,
            _description: &str,
            _status: JobStatus,
            _last_error: Option<&str>,
        ) -> Result<()> {
            Err(CronError::Storage("storage down".to_string()))
        }

        async fn register_execution(&self, _record: &ExecutionRecord) -> Result<()> {
            Err(CronError::Storage("storage down".to_string()))
        }

        async fn find_executions(
            &self,
            _filter: &ExecutionFilter,
            _max_limit: u64,
        ) -> Result<Vec<ExecutionRecord>> {
            Err(CronError::Storage("storage down".to_string()))
        }

        async fn set_jobs_to_inactive(&self, _source: &str) -> Result<()> {
            Err(CronError::Storage("storage down".to_string()))
        }
    }

    fn noop_job(name: &str, schedule: &str) -> Job {
        Job::new(name, schedule).with_work(|| async { Ok(()) })
    }

    #[tokio::test]
    async fn test_register_validations() {
        let scheduler = CronScheduler::new("test-app");

        let err = scheduler
            .register(Job::new("job", "").with_work(|| async { Ok(()) }))
            .await
            .unwrap_err();
        assert!(matches!(err, CronError::MissingSchedule));

        let err = scheduler
            .register(Job::new("", "* * * * *").with_work(|| async { Ok(()) }))
            .await
            .unwrap_err();
        assert!(matches!(err, CronError::MissingJobName));

        let err = scheduler
            .register(Job::new("job", "* * * * *"))
            .await
            .unwrap_err();
        assert!(matches!(err, CronError::MissingWorkFn));

        assert_eq!(scheduler.job_count().await, 0);
    }

    #[tokio::test]
    async fn test_register_duplicate_name() {
        let scheduler = CronScheduler::new("test-app");

        scheduler.register(noop_job("sync", "* * * * *")).await.unwrap();
        let err = scheduler
            .register(noop_job("sync", "0 * * * *"))
            .await
            .unwrap_err();

        assert!(matches!(err, CronError::DuplicateJob(name) if name == "sync"));
        assert_eq!(scheduler.job_count().await, 1);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_schedule_expression() {
        let scheduler = CronScheduler::new("test-app");

        let err = scheduler
            .register(noop_job("sync", "not a schedule"))
            .await
            .unwrap_err();

        assert!(matches!(err, CronError::InvalidExpression(_)));
        assert_eq!(scheduler.job_count().await, 0);
    }

    #[tokio::test]
    async fn test_register_aborts_when_initial_status_write_fails() {
        let scheduler =
            CronScheduler::new("test-app").with_storage(Arc::new(FailingStorage));

        let err = scheduler
            .register(noop_job("sync", "* * * * *"))
            .await
            .unwrap_err();

        assert!(matches!(err, CronError::Storage(_)));
        assert_eq!(scheduler.job_count().await, 0);
    }

    #[tokio::test]
    async fn test_register_writes_initialized_status() {
        let storage = Arc::new(MemoryStorage::new());
        let scheduler = CronScheduler::new("test-app").with_storage(storage.clone());

        scheduler
            .register(noop_job("sync", "@every 1m").with_description("pull data"))
            .await
            .unwrap();

        let jobs = storage.find_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].source, "test-app");
        assert_eq!(jobs[0].name, "sync");
        assert_eq!(jobs[0].schedule, "@every 1m");
        assert_eq!(jobs[0].description, "pull data");
        assert_eq!(jobs[0].status, JobStatus::Initialized);
    }

    #[tokio::test]
    async fn test_successful_run_pipeline() {
        let storage = Arc::new(MemoryStorage::new());
        let trigger = Arc::new(ManualTrigger::new());
        let scheduler = CronScheduler::new("test-app")
            .with_storage(storage.clone())
            .with_trigger(trigger.clone());

        let runs = Arc::new(AtomicUsize::new(0));
        let job = {
            let runs = runs.clone();
            Job::new("sync", "@every 1s").with_work(move || {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };
        scheduler.register(job).await.unwrap();

        trigger.fire(0).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let jobs = storage.find_jobs().await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Done);
        assert!(!jobs[0].exited_with_error);
        assert_eq!(jobs[0].last_error, "");

        let executions = storage
            .find_executions(&ExecutionFilter::new().for_name("sync"), 100)
            .await
            .unwrap();
        assert_eq!(executions.len(), 1);
        assert!(!executions[0].exited_with_error());
    }

    #[tokio::test]
    async fn test_failed_run_reaches_hooks_and_record() {
        let storage = Arc::new(MemoryStorage::new());
        let trigger = Arc::new(ManualTrigger::new());
        let scheduler = CronScheduler::new("test-app")
            .with_storage(storage.clone())
            .with_trigger(trigger.clone());

        let completed_with = Arc::new(std::sync::Mutex::new(None::<String>));
        let errored_with = Arc::new(std::sync::Mutex::new(None::<String>));

        let job = Job::new("flaky", "@every 1s")
            .with_work(|| async { Err::<(), BoxError>("connection refused".into()) })
            .on_complete({
                let completed_with = completed_with.clone();
                move |outcome| {
                    *completed_with.lock().unwrap() = outcome.map(|e| e.to_string());
                }
            })
            .on_error({
                let errored_with = errored_with.clone();
                move |err| {
                    *errored_with.lock().unwrap() = Some(err.to_string());
                }
            });
        scheduler.register(job).await.unwrap();

        trigger.fire(0).await;

        assert_eq!(
            completed_with.lock().unwrap().as_deref(),
            Some("connection refused")
        );
        assert_eq!(
            errored_with.lock().unwrap().as_deref(),
            Some("connection refused")
        );

        let jobs = storage.find_jobs().await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Done);
        assert!(jobs[0].exited_with_error);
        assert_eq!(jobs[0].last_error, "connection refused");

        let executions = storage
            .find_executions(&ExecutionFilter::new().for_name("flaky"), 100)
            .await
            .unwrap();
        assert_eq!(executions[0].error, "connection refused");
    }

    #[tokio::test]
    async fn test_on_error_not_invoked_on_success() {
        let trigger = Arc::new(ManualTrigger::new());
        let scheduler = CronScheduler::new("test-app").with_trigger(trigger.clone());

        let completions = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let job = Job::new("clean", "@every 1s")
            .with_work(|| async { Ok(()) })
            .on_complete({
                let completions = completions.clone();
                move |outcome| {
                    assert!(outcome.is_none());
                    completions.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_error({
                let errors = errors.clone();
                move |_| {
                    errors.fetch_add(1, Ordering::SeqCst);
                }
            });
        scheduler.register(job).await.unwrap();

        trigger.fire(0).await;

        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_firings_skip() {
        let trigger = Arc::new(ManualTrigger::new());
        let scheduler = CronScheduler::new("test-app").with_trigger(trigger.clone());

        let runs = Arc::new(AtomicUsize::new(0));
        let job = {
            let runs = runs.clone();
            Job::new("slow", "@every 1s").with_work(move || {
                let runs = runs.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };
        scheduler.register(job).await.unwrap();

        tokio::join!(trigger.fire(0), trigger.fire(0));

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.skipped("slow").await, Some(1));
    }

    #[tokio::test]
    async fn test_storage_failure_during_run_does_not_stop_work() {
        let runs = Arc::new(AtomicUsize::new(0));
        let ctx = Arc::new(RunContext {
            source: "test-app".to_string(),
            name: "sync".to_string(),
            schedule: "@every 1s".to_string(),
            description: String::new(),
            work: {
                let runs = runs.clone();
                Arc::new(move || {
                    let runs = runs.clone();
                    Box::pin(async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok::<(), BoxError>(())
                    }) as crate::types::WorkFuture
                })
            },
            on_complete: None,
            on_error: None,
            storage: Some(Arc::new(FailingStorage)),
        });

        run_job(ctx).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_set_jobs_to_inactive() {
        let storage = Arc::new(MemoryStorage::new());
        let scheduler = CronScheduler::new("test-app").with_storage(storage.clone());

        scheduler.register(noop_job("a", "@every 1m")).await.unwrap();
        scheduler.register(noop_job("b", "@every 5m")).await.unwrap();

        scheduler.set_jobs_to_inactive().await.unwrap();

        let jobs = storage.find_jobs().await.unwrap();
        assert_eq!(jobs.len(), 2);
        for job in jobs {
            assert_eq!(job.status, JobStatus::Inactive);
        }
    }

    #[tokio::test]
    async fn test_set_jobs_to_inactive_without_storage() {
        let scheduler = CronScheduler::new("test-app");
        assert!(scheduler.set_jobs_to_inactive().await.is_ok());
    }

    #[tokio::test]
    async fn test_registry_introspection() {
        let scheduler = CronScheduler::new("test-app");
        scheduler
            .register(noop_job("a", "@every 1m"))
            .await
            .unwrap();
        scheduler
            .register(
                Job::new("b", "0 2 * * *")
                    .with_description("nightly")
                    .with_work(|| async { Ok(()) }),
            )
            .await
            .unwrap();

        assert_eq!(scheduler.job_names().await, vec!["a", "b"]);
        assert_eq!(scheduler.schedule_of("b").await.as_deref(), Some("0 2 * * *"));
        assert_eq!(scheduler.description_of("b").await.as_deref(), Some("nightly"));
        assert_eq!(scheduler.schedule_of("missing").await, None);
    }
}
