//! cronflight - in-process job scheduling with single-flight execution
//!
//! Registers named, independently scheduled jobs, guarantees that no job runs
//! concurrently with itself (overlapping firings are skipped, never queued),
//! tracks each job's lifecycle status, and optionally persists status
//! transitions and execution history through a pluggable storage trait.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cronflight::{CronScheduler, Job, MemoryStorage};
//! use std::sync::Arc;
//!
//! # async fn example() -> cronflight::Result<()> {
//! let scheduler = CronScheduler::new("my-app")
//!     .with_storage(Arc::new(MemoryStorage::new()));
//!
//! scheduler
//!     .register(
//!         Job::new("sync-rates", "@every 30s")
//!             .with_description("pull fx rates")
//!             .with_work(|| async {
//!                 // ... fallible work ...
//!                 Ok(())
//!             })
//!             .on_error(|err| eprintln!("sync-rates failed: {err}")),
//!     )
//!     .await?;
//!
//! scheduler.start();
//! // keep the process alive for as long as the scheduler should run
//! # Ok(())
//! # }
//! ```
//!
//! ## Pieces
//!
//! - [`CronScheduler`] — registration, the per-firing pipeline, inactivation
//! - [`JobGuard`] — per-job non-blocking single-flight wrapper
//! - [`TriggerSource`] / [`CronTrigger`] — when schedules fire
//! - [`CronStorage`] — persistence seam, with [`MemoryStorage`] and
//!   [`FileStorage`] bundled
//! - [`ErrorGroup`] — non-short-circuiting error accumulation

mod error;
mod guard;
mod parser;
mod scheduler;
mod store;
mod trigger;
mod types;

pub use error::{CronError, ErrorGroup, Result};
pub use guard::JobGuard;
pub use parser::{CronExpression, Schedule};
pub use scheduler::CronScheduler;
pub use store::{CronStorage, FileStorage, MemoryStorage};
pub use trigger::{CronTrigger, ManualTrigger, TriggerCallback, TriggerSource};
pub use types::{
    BoxError, ExecutionFilter, ExecutionRecord, Job, JobRecord, JobStatus, WorkFn, WorkFuture,
};
