//! Background drain loop.
//!
//! The engine itself is synchronous. The scheduler owns a tokio task that
//! wakes on engine notifications (enqueue, platform signals) or on a fixed
//! tick, and runs [`SyncEngine::tick`] on the blocking pool.

use crate::engine::SyncEngine;
use crate::transport::SyncTransport;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default housekeeping tick.
pub const DEFAULT_TICK: Duration = Duration::from_millis(500);

/// Scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// `start` was called twice.
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// `stop` was called without a running task.
    #[error("scheduler is not running")]
    NotRunning,

    /// Zero tick interval.
    #[error("invalid tick interval: {0:?}")]
    InvalidInterval(Duration),
}

/// Drives an engine from a tokio runtime.
pub struct SyncScheduler {
    tick: Duration,
    running: Arc<AtomicBool>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for SyncScheduler {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            running: Arc::new(AtomicBool::new(false)),
            task_handle: Mutex::new(None),
        }
    }
}

impl SyncScheduler {
    /// Creates a scheduler with the given tick.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidInterval`] for a zero tick.
    pub fn new(tick: Duration) -> Result<Self, SchedulerError> {
        if tick.is_zero() {
            return Err(SchedulerError::InvalidInterval(tick));
        }
        Ok(Self {
            tick,
            ..Self::default()
        })
    }

    /// Whether the background task is live.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the loop on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::AlreadyRunning`] if already started.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start<T>(&self, engine: Arc<SyncEngine<T>>) -> Result<(), SchedulerError>
    where
        T: SyncTransport + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let running = Arc::clone(&self.running);
        let tick = self.tick;
        let handle = tokio::spawn(async move {
            Self::run_loop(engine, tick, &running).await;
            running.store(false, Ordering::SeqCst);
        });
        *self.task_handle.lock() = Some(handle);

        info!(tick = ?self.tick, "sync scheduler started");
        Ok(())
    }

    /// Stops the loop and waits for the task to end.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotRunning`] if it was never started.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }
        let handle = self.task_handle.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            // Cancellation is the expected outcome.
            let _ = handle.await;
        }
        info!("sync scheduler stopped");
        Ok(())
    }

    async fn run_loop<T>(engine: Arc<SyncEngine<T>>, tick: Duration, running: &AtomicBool)
    where
        T: SyncTransport + 'static,
    {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while running.load(Ordering::SeqCst) && !engine.is_shut_down() {
            tokio::select! {
                _ = interval.tick() => {}
                () = engine.wait_for_work() => {
                    debug!("scheduler woken");
                }
            }
            if engine.is_shut_down() {
                break;
            }

            let worker = Arc::clone(&engine);
            match tokio::task::spawn_blocking(move || worker.tick()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "scheduled drain failed"),
                Err(e) => {
                    warn!(error = %e, "drain task panicked");
                    break;
                }
            }
        }
        debug!("scheduler loop exited");
    }
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("tick", &self.tick)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
