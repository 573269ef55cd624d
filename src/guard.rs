//! Single-flight execution guard
//!
//! Every registered job gets one guard wrapping its run pipeline. The guard's
//! lock is acquired with a non-blocking try-lock: a firing that arrives while
//! a previous run is still in progress is skipped, never queued.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

type RunFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Non-blocking mutual-exclusion wrapper around one job's run pipeline.
///
/// Guarantees at most one concurrent execution per job: the permit is held for
/// the whole wrapped run and released when it drops, on every exit path
/// including unwind.
pub struct JobGuard {
    name: String,
    run: RunFn,
    lock: Mutex<()>,
    skipped: AtomicU64,
}

impl JobGuard {
    /// Wrap a run pipeline for the named job
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move || Box::pin(run())),
            lock: Mutex::new(()),
            skipped: AtomicU64::new(0),
        }
    }

    /// Run the wrapped pipeline if no other invocation holds the guard.
    ///
    /// On contention this returns immediately without running anything; the
    /// firing is dropped, not deferred. Skips are expected steady-state
    /// behavior under overlapping schedules, not errors.
    pub async fn try_run(&self) {
        match self.lock.try_lock() {
            Ok(_held) => (self.run)().await,
            Err(_) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(job = %self.name, "job already running, skipping");
            }
        }
    }

    /// Name of the guarded job
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of firings dropped because the guard was held
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}
