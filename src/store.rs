//! Job status and execution history persistence
//!
//! The scheduler only consumes the [`CronStorage`] trait; the bundled
//! [`MemoryStorage`] and [`FileStorage`] backends cover single-process use and
//! tests. Real deployments can implement the trait over any database.

use crate::error::Result;
use crate::types::{ExecutionFilter, ExecutionRecord, JobRecord, JobStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// Persistence interface consumed by the scheduler.
///
/// Job-status rows are upserts keyed by `(source, name)`; execution records
/// are append-only.
#[async_trait]
pub trait CronStorage: Send + Sync {
    /// All persisted job-status rows
    async fn find_jobs(&self) -> Result<Vec<JobRecord>>;

    /// Upsert the status row for `(source, name)`. `last_error` carries the
    /// message of the run that produced this transition, `None` when clean.
    async fn register_job_status(
        &self,
        source: &str,
        name: &str,
        schedule: &str,
        description: &str,
        status: JobStatus,
        last_error: Option<&str>,
    ) -> Result<()>;

    /// Append one execution record
    async fn register_execution(&self, record: &ExecutionRecord) -> Result<()>;

    /// Execution records matching `filter`, newest first. The effective limit
    /// is the filter's, clamped to `max_limit` (`0` in the filter means "up to
    /// `max_limit`").
    async fn find_executions(
        &self,
        filter: &ExecutionFilter,
        max_limit: u64,
    ) -> Result<Vec<ExecutionRecord>>;

    /// Mark every job belonging to `source` as inactive. Advisory shutdown
    /// bookkeeping, not synchronized against running jobs.
    async fn set_jobs_to_inactive(&self, source: &str) -> Result<()>;
}

/// Apply a status transition to an existing row
fn transition(record: &mut JobRecord, status: JobStatus, last_error: Option<&str>) {
    record.status = status;
    record.last_error = last_error.unwrap_or_default().to_string();
    record.exited_with_error = last_error.is_some();
    record.updated_at = Utc::now();
}

/// Shared query path: filter, sort newest first, clamp, paginate
fn apply_filter(
    mut records: Vec<ExecutionRecord>,
    filter: &ExecutionFilter,
    max_limit: u64,
) -> Vec<ExecutionRecord> {
    records.retain(|r| filter.matches(r));
    records.sort_by(|a, b| b.started_at.cmp(&a.started_at));

    let limit = if filter.limit == 0 {
        max_limit
    } else {
        filter.limit.min(max_limit)
    };

    records
        .into_iter()
        .skip(filter.skip as usize)
        .take(limit as usize)
        .collect()
}

// ============================================================================
// In-Memory Storage
// ============================================================================

/// In-memory storage, the primary test double
pub struct MemoryStorage {
    jobs: RwLock<HashMap<(String, String), JobRecord>>,
    executions: RwLock<Vec<ExecutionRecord>>,
}

impl MemoryStorage {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            executions: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CronStorage for MemoryStorage {
    async fn find_jobs(&self) -> Result<Vec<JobRecord>> {
        let jobs = self.jobs.read().await;
        let mut records: Vec<JobRecord> = jobs.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn register_job_status(
        &self,
        source: &str,
        name: &str,
        schedule: &str,
        description: &str,
        status: JobStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let key = (source.to_string(), name.to_string());

        match jobs.get_mut(&key) {
            Some(record) => {
                record.schedule = schedule.to_string();
                record.description = description.to_string();
                transition(record, status, last_error);
            }
            None => {
                let mut record = JobRecord::new(source, name, schedule, description, status);
                if last_error.is_some() {
                    transition(&mut record, status, last_error);
                }
                jobs.insert(key, record);
            }
        }

        Ok(())
    }

    async fn register_execution(&self, record: &ExecutionRecord) -> Result<()> {
        self.executions.write().await.push(record.clone());
        Ok(())
    }

    async fn find_executions(
        &self,
        filter: &ExecutionFilter,
        max_limit: u64,
    ) -> Result<Vec<ExecutionRecord>> {
        let executions = self.executions.read().await;
        Ok(apply_filter(executions.clone(), filter, max_limit))
    }

    async fn set_jobs_to_inactive(&self, source: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        for record in jobs.values_mut().filter(|r| r.source == source) {
            transition(record, JobStatus::Inactive, None);
        }
        Ok(())
    }
}

// ============================================================================
// File Storage
// ============================================================================

/// File-backed storage.
///
/// Keeps two JSON files under the base directory:
/// ```text
/// <base>/
///   jobs.json         # all status rows
///   executions.json   # append-only execution history
/// ```
/// Rewrites go through a temp file plus rename.
pub struct FileStorage {
    jobs_file: PathBuf,
    executions_file: PathBuf,
    // Serializes read-modify-write cycles on the two files
    io: RwLock<()>,
}

impl FileStorage {
    /// Create a file store rooted at `base_dir`, initializing empty files on
    /// first use
    pub async fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        fs::create_dir_all(base_dir).await?;

        let jobs_file = base_dir.join("jobs.json");
        let executions_file = base_dir.join("executions.json");

        if !jobs_file.exists() {
            write_atomic(&jobs_file, &Vec::<JobRecord>::new()).await?;
        }
        if !executions_file.exists() {
            write_atomic(&executions_file, &Vec::<ExecutionRecord>::new()).await?;
        }

        Ok(Self {
            jobs_file,
            executions_file,
            io: RwLock::new(()),
        })
    }

    async fn load_jobs(&self) -> Result<Vec<JobRecord>> {
        let content = fs::read_to_string(&self.jobs_file).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn load_executions(&self) -> Result<Vec<ExecutionRecord>> {
        let content = fs::read_to_string(&self.executions_file).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

async fn write_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let temp_path = path.with_extension("json.tmp");

    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(json.as_bytes()).await?;
    file.sync_all().await?;
    fs::rename(&temp_path, path).await?;

    Ok(())
}

#[async_trait]
impl CronStorage for FileStorage {
    async fn find_jobs(&self) -> Result<Vec<JobRecord>> {
        let _io = self.io.read().await;
        self.load_jobs().await
    }

    async fn register_job_status(
        &self,
        source: &str,
        name: &str,
        schedule: &str,
        description: &str,
        status: JobStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        let _io = self.io.write().await;
        let mut jobs = self.load_jobs().await?;

        match jobs
            .iter_mut()
            .find(|r| r.source == source && r.name == name)
        {
            Some(record) => {
                record.schedule = schedule.to_string();
                record.description = description.to_string();
                transition(record, status, last_error);
            }
            None => {
                let mut record = JobRecord::new(source, name, schedule, description, status);
                if last_error.is_some() {
                    transition(&mut record, status, last_error);
                }
                jobs.push(record);
            }
        }

        write_atomic(&self.jobs_file, &jobs).await
    }

    async fn register_execution(&self, record: &ExecutionRecord) -> Result<()> {
        let _io = self.io.write().await;
        let mut executions = self.load_executions().await?;
        executions.push(record.clone());
        write_atomic(&self.executions_file, &executions).await
    }

    async fn find_executions(
        &self,
        filter: &ExecutionFilter,
        max_limit: u64,
    ) -> Result<Vec<ExecutionRecord>> {
        let _io = self.io.read().await;
        let executions = self.load_executions().await?;
        Ok(apply_filter(executions, filter, max_limit))
    }

    async fn set_jobs_to_inactive(&self, source: &str) -> Result<()> {
        let _io = self.io.write().await;
        let mut jobs = self.load_jobs().await?;

        for record in jobs.iter_mut().filter(|r| r.source == source) {
            transition(record, JobStatus::Inactive, None);
        }

        write_atomic(&self.jobs_file, &jobs).await
    }
}
