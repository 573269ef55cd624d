//! Core types for the cronflight scheduler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Error type produced by job work functions
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by a job's work function
pub type WorkFuture = Pin<Box<dyn Future<Output = std::result::Result<(), BoxError>> + Send>>;

/// A job's work function: fallible, async, re-invoked on every firing
pub type WorkFn = Arc<dyn Fn() -> WorkFuture + Send + Sync>;

/// Hook invoked after every run with the run's outcome (`None` on success)
pub type CompleteHook = Arc<dyn Fn(Option<&BoxError>) + Send + Sync>;

/// Hook invoked after failed runs with the work function's error
pub type ErrorHook = Arc<dyn Fn(&BoxError) + Send + Sync>;

/// A named, schedule-bound unit of work.
///
/// Built by the caller and handed to [`CronScheduler::register`] once; the
/// scheduler owns it afterwards. The owning `source` is stamped by the
/// scheduler at registration, never by the job itself.
///
/// [`CronScheduler::register`]: crate::CronScheduler::register
#[derive(Clone)]
pub struct Job {
    /// Unique name within one scheduler instance
    pub name: String,

    /// Schedule expression, interpreted by the trigger source
    pub schedule: String,

    /// Optional, informational only
    pub description: String,

    pub(crate) work: Option<WorkFn>,
    pub(crate) on_complete: Option<CompleteHook>,
    pub(crate) on_error: Option<ErrorHook>,
}

impl Job {
    /// Create a new job definition. The work function is attached with
    /// [`Job::with_work`]; registering without one fails validation.
    pub fn new(name: impl Into<String>, schedule: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            description: String::new(),
            work: None,
            on_complete: None,
            on_error: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attach the work function
    pub fn with_work<F, Fut>(mut self, work: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.work = Some(Arc::new(move || Box::pin(work())));
        self
    }

    /// Attach a hook invoked after every run, successful or not
    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(Option<&BoxError>) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    /// Attach a hook invoked only after failed runs
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&BoxError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("description", &self.description)
            .field("has_work", &self.work.is_some())
            .field("has_on_complete", &self.on_complete.is_some())
            .field("has_on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Lifecycle status of a registered job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Registered, never fired
    Initialized,
    /// Currently executing
    Running,
    /// Finished at least once, not currently running
    Done,
    /// Explicitly marked inactive by the owning process, e.g. at shutdown
    Inactive,
    /// Persisted under this source but absent from the current registration
    /// set. Set by storage-side reconciliation only, never by the scheduler.
    Removed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Initialized => write!(f, "initialized"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Inactive => write!(f, "inactive"),
            JobStatus::Removed => write!(f, "removed"),
        }
    }
}

/// Persisted status row for one registered job, keyed by `(source, name)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Record identifier
    pub id: String,

    /// Logical owner of the job (the registering scheduler's source)
    pub source: String,

    /// Job name
    pub name: String,

    /// Current lifecycle status
    pub status: JobStatus,

    /// Schedule expression the job was registered with
    pub schedule: String,

    /// Job description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Message of the last run's error, empty when the last run was clean
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_error: String,

    /// Whether the last finished run returned an error
    pub exited_with_error: bool,

    /// First registration timestamp
    pub created_at: DateTime<Utc>,

    /// Last status transition timestamp
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a fresh record for a first-time status write
    pub fn new(
        source: impl Into<String>,
        name: impl Into<String>,
        schedule: impl Into<String>,
        description: impl Into<String>,
        status: JobStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            name: name.into(),
            status,
            schedule: schedule.into(),
            description: description.into(),
            last_error: String::new(),
            exited_with_error: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable record of one job run's timing and outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Logical owner of the job
    pub source: String,

    /// Job name
    pub name: String,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished
    pub finished_at: DateTime<Utc>,

    /// Elapsed wall-clock time in milliseconds
    pub duration_ms: u64,

    /// Error message, empty on success
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl ExecutionRecord {
    /// Build the record for a run that just finished. `finished_at` and the
    /// elapsed duration are computed here, once.
    pub fn new(
        source: impl Into<String>,
        name: impl Into<String>,
        started_at: DateTime<Utc>,
        error: Option<&BoxError>,
    ) -> Self {
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            source: source.into(),
            name: name.into(),
            started_at,
            finished_at,
            duration_ms,
            error: error.map(|e| e.to_string()).unwrap_or_default(),
        }
    }

    /// Whether the run returned an error
    pub fn exited_with_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Query shape for execution history lookups.
///
/// Empty string fields and `None` bounds match everything; `limit == 0` means
/// "up to the store's max limit".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionFilter {
    /// Inclusive lower bound on `started_at`
    pub from: Option<DateTime<Utc>>,

    /// Inclusive upper bound on `started_at`
    pub to: Option<DateTime<Utc>>,

    /// Match only this source
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,

    /// Match only this job name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Match only runs that took at least this long
    pub min_duration_ms: u64,

    /// Max records to return, clamped by the store's max limit
    pub limit: u64,

    /// Records to skip, applied after sorting newest-first
    pub skip: u64,
}

impl ExecutionFilter {
    /// Filter that matches every execution
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a source
    pub fn for_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Restrict to a job name
    pub fn for_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Restrict to runs started at or after `from`
    pub fn since(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    /// Restrict to runs started at or before `to`
    pub fn until(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    /// Restrict to runs that took at least `min_duration_ms`
    pub fn min_duration(mut self, min_duration_ms: u64) -> Self {
        self.min_duration_ms = min_duration_ms;
        self
    }

    /// Cap the number of returned records
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Skip the first `skip` records after sorting
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    /// Whether a record passes this filter (pagination excluded)
    pub fn matches(&self, record: &ExecutionRecord) -> bool {
        if !self.source.is_empty() && record.source != self.source {
            return false;
        }
        if !self.name.is_empty() && record.name != self.name {
            return false;
        }
        if let Some(from) = self.from {
            if record.started_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if record.started_at > to {
                return false;
            }
        }
        record.duration_ms >= self.min_duration_ms
    }
}
