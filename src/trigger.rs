//! Trigger sources
//!
//! A trigger source accepts a schedule expression and a callback at install
//! time, and invokes the callback at each due time once started. The scheduler
//! only depends on the [`TriggerSource`] trait; [`CronTrigger`] is the bundled
//! tokio implementation and [`ManualTrigger`] a deterministic substitute for
//! tests.

use crate::error::Result;
use crate::parser::Schedule;
use chrono::Utc;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// Callback installed for one schedule entry, invoked at each due time
pub type TriggerCallback = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// External time-trigger mechanism consumed by the scheduler
pub trait TriggerSource: Send + Sync {
    /// Install a callback for a schedule expression. Fails synchronously on a
    /// malformed expression; the failure propagates out of registration.
    fn install(&self, schedule: &str, callback: TriggerCallback) -> Result<()>;

    /// Begin dispatching installed callbacks. Never blocks; keeping the
    /// process alive is the caller's job.
    fn start(&self);
}

struct Entry {
    schedule: Schedule,
    callback: TriggerCallback,
}

/// Tokio-based trigger: one task per installed entry, each firing spawned on
/// its own task so a slow run never delays the next due time.
pub struct CronTrigger {
    pending: Mutex<Vec<Entry>>,
    started: AtomicBool,
}

impl CronTrigger {
    /// Create a trigger with no entries
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    fn dispatch(entry: Entry) {
        tokio::spawn(async move {
            match entry.schedule {
                Schedule::Every(period) => {
                    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                    loop {
                        ticker.tick().await;
                        tokio::spawn((entry.callback)());
                    }
                }
                Schedule::Cron(expr) => loop {
                    let now = Utc::now();
                    let Some(next) = expr.next_after(now) else {
                        tracing::warn!("cron entry has no future firing, dropping it");
                        break;
                    };
                    let wait = (next - now).to_std().unwrap_or_default();
                    tokio::time::sleep(wait).await;
                    tokio::spawn((entry.callback)());
                },
            }
        });
    }

    fn pending_lock(&self) -> std::sync::MutexGuard<'_, Vec<Entry>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for CronTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerSource for CronTrigger {
    fn install(&self, schedule: &str, callback: TriggerCallback) -> Result<()> {
        let entry = Entry {
            schedule: Schedule::parse(schedule)?,
            callback,
        };

        if self.started.load(Ordering::Acquire) {
            Self::dispatch(entry);
        } else {
            self.pending_lock().push(entry);
        }

        Ok(())
    }

    fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let entries: Vec<Entry> = self.pending_lock().drain(..).collect();
        for entry in entries {
            Self::dispatch(entry);
        }
    }
}

/// Trigger that only fires on demand. Validates expressions like the real
/// trigger but leaves all timing to the caller, which makes pipeline behavior
/// testable without sleeping.
pub struct ManualTrigger {
    callbacks: Mutex<Vec<TriggerCallback>>,
}

impl ManualTrigger {
    /// Create an empty manual trigger
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Number of installed callbacks, in install order
    pub fn len(&self) -> usize {
        self.callbacks_lock().len()
    }

    /// True if nothing is installed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fire the `index`-th installed callback and wait for it to finish
    pub async fn fire(&self, index: usize) {
        let callback = self.callbacks_lock().get(index).cloned();
        if let Some(callback) = callback {
            callback().await;
        }
    }

    fn callbacks_lock(&self) -> std::sync::MutexGuard<'_, Vec<TriggerCallback>> {
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ManualTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerSource for ManualTrigger {
    fn install(&self, schedule: &str, callback: TriggerCallback) -> Result<()> {
        Schedule::parse(schedule)?;
        self.callbacks_lock().push(callback);
        Ok(())
    }

    fn start(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_callback(counter: Arc<AtomicUsize>) -> TriggerCallback {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test]
    async fn test_install_rejects_bad_expression() {
        let trigger = CronTrigger::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let result = trigger.install("not a schedule", counting_callback(counter));
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_entry_fires_on_interval() {
        let trigger = CronTrigger::new();
        let counter = Arc::new(AtomicUsize::new(0));
        trigger
            .install("@every 1s", counting_callback(counter.clone()))
            .unwrap();

        trigger.start();
        tokio::time::sleep(Duration::from_millis(3200)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_fires_before_start() {
        let trigger = CronTrigger::new();
        let counter = Arc::new(AtomicUsize::new(0));
        trigger
            .install("@every 1s", counting_callback(counter.clone()))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        trigger.start();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_after_start_dispatches() {
        let trigger = CronTrigger::new();
        trigger.start();

        let counter = Arc::new(AtomicUsize::new(0));
        trigger
            .install("@every 1s", counting_callback(counter.clone()))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_manual_trigger_fires_on_demand() {
        let trigger = ManualTrigger::new();
        let counter = Arc::new(AtomicUsize::new(0));
        trigger
            .install("* * * * *", counting_callback(counter.clone()))
            .unwrap();

        assert_eq!(trigger.len(), 1);
        trigger.fire(0).await;
        trigger.fire(0).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
