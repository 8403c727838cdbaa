//! Drain scheduling: the single-flight trigger and background-sync tags.

use crate::config::MIN_PERIODIC_INTERVAL;
use crate::error::{SyncError, SyncResult};
use offsync_core::duration_ms;
use offsync_protocol::Timestamp;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Tag registered for the default background sync.
pub const DEFAULT_SYNC_TAG: &str = "syncData";

/// Why a drain was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerReason {
    /// An operation was enqueued while online.
    Enqueue,
    /// Connectivity returned.
    Reconnect,
    /// The platform fired a background-sync registration.
    BackgroundSync(String),
    /// A periodic registration came due.
    Periodic(String),
    /// The caller asked for "sync now".
    Manual,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enqueue => f.write_str("enqueue"),
            Self::Reconnect => f.write_str("reconnect"),
            Self::BackgroundSync(tag) => write!(f, "background-sync:{tag}"),
            Self::Periodic(tag) => write!(f, "periodic:{tag}"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// Trigger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    /// Nothing to do.
    Idle,
    /// A drain was requested and has not started yet.
    Scheduled,
    /// A drain is in progress.
    Running,
}

/// Result of [`SyncTrigger::request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// The trigger moved to `scheduled`; someone should start a drain.
    Schedule,
    /// A drain was already scheduled.
    AlreadyScheduled,
    /// A drain is running; a rerun was requested instead.
    Coalesced,
}

#[derive(Debug)]
struct TriggerInner {
    state: TriggerState,
    rerun_requested: bool,
    rerun_reason: Option<TriggerReason>,
    scheduled_reason: Option<TriggerReason>,
    runs: u64,
}

/// Single-flight guard around the drain routine.
///
/// At most one run is `running` at a time. A trigger arriving mid-run sets
/// the rerun flag, and the running drain makes another pass before it
/// returns to `idle`. If the run aborts instead, the request survives as a
/// `scheduled` drain.
#[derive(Debug)]
pub struct SyncTrigger {
    inner: Mutex<TriggerInner>,
}

impl Default for SyncTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTrigger {
    /// Creates an idle trigger.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TriggerInner {
                state: TriggerState::Idle,
                rerun_requested: false,
                rerun_reason: None,
                scheduled_reason: None,
                runs: 0,
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> TriggerState {
        self.inner.lock().state
    }

    /// Whether a rerun is pending for the current run.
    pub fn rerun_requested(&self) -> bool {
        self.inner.lock().rerun_requested
    }

    /// Completed runs since creation.
    pub fn runs(&self) -> u64 {
        self.inner.lock().runs
    }

    /// Records a request without starting anything.
    pub fn request(&self, reason: TriggerReason) -> TriggerDecision {
        let mut inner = self.inner.lock();
        match inner.state {
            TriggerState::Idle => {
                inner.state = TriggerState::Scheduled;
                inner.scheduled_reason = Some(reason);
                TriggerDecision::Schedule
            }
            TriggerState::Scheduled => TriggerDecision::AlreadyScheduled,
            TriggerState::Running => {
                debug!(%reason, "drain running, rerun requested");
                inner.rerun_requested = true;
                inner.rerun_reason = Some(reason);
                TriggerDecision::Coalesced
            }
        }
    }

    /// Reason of a drain that is scheduled but not started.
    pub fn scheduled_reason(&self) -> Option<TriggerReason> {
        let inner = self.inner.lock();
        match inner.state {
            TriggerState::Scheduled => inner.scheduled_reason.clone(),
            _ => None,
        }
    }

    /// Drops a scheduled drain that can no longer run, e.g. after going
    /// offline. Returns whether one was scheduled.
    pub fn cancel_scheduled(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == TriggerState::Scheduled {
            inner.state = TriggerState::Idle;
            inner.scheduled_reason = None;
            true
        } else {
            false
        }
    }

    /// Enters `running`, or coalesces into the current run.
    ///
    /// Returns `None` when another run holds the trigger; that run will make
    /// another pass.
    pub fn begin(&self, reason: TriggerReason) -> Option<RunGuard<'_>> {
        let mut inner = self.inner.lock();
        if inner.state == TriggerState::Running {
            inner.rerun_requested = true;
            inner.rerun_reason = Some(reason);
            return None;
        }
        inner.state = TriggerState::Running;
        inner.scheduled_reason = None;
        inner.rerun_requested = false;
        inner.rerun_reason = None;
        Some(RunGuard {
            trigger: self,
            done: false,
        })
    }
}

/// Exclusive right to drain.
///
/// Dropping it before the last pass finished (an aborted run) returns the
/// trigger to `idle`, or to `scheduled` when a rerun was requested.
#[derive(Debug)]
pub struct RunGuard<'a> {
    trigger: &'a SyncTrigger,
    done: bool,
}

impl RunGuard<'_> {
    /// Ends a pass. Returns true if another pass was requested meanwhile,
    /// in which case the guard stays held; otherwise the trigger goes idle.
    pub fn finish_pass(&mut self) -> bool {
        let mut inner = self.trigger.inner.lock();
        if inner.rerun_requested {
            inner.rerun_requested = false;
            inner.rerun_reason = None;
            return true;
        }
        inner.state = TriggerState::Idle;
        inner.runs += 1;
        self.done = true;
        false
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            let mut inner = self.trigger.inner.lock();
            if inner.rerun_requested {
                inner.state = TriggerState::Scheduled;
                inner.scheduled_reason = inner.rerun_reason.take();
            } else {
                inner.state = TriggerState::Idle;
            }
            inner.rerun_requested = false;
            inner.runs += 1;
        }
    }
}

#[derive(Debug, Clone)]
struct PeriodicRegistration {
    interval_ms: u64,
    last_fired: Option<Timestamp>,
    registered_at: Timestamp,
}

/// Background-sync registrations.
///
/// One-off tags fire once when the platform wakes the handler, then are
/// removed. Periodic tags need an explicit permission grant and an interval
/// of at least [`MIN_PERIODIC_INTERVAL`].
#[derive(Debug, Default)]
pub struct BackgroundSyncRegistry {
    one_off: Mutex<Vec<String>>,
    periodic: Mutex<BTreeMap<String, PeriodicRegistration>>,
    periodic_permission: Mutex<bool>,
}

impl BackgroundSyncRegistry {
    /// Creates an empty registry without periodic permission.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a one-off tag. Registering twice is a no-op.
    pub fn register(&self, tag: &str) {
        let mut tags = self.one_off.lock();
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }

    /// Whether a one-off tag is registered.
    pub fn is_registered(&self, tag: &str) -> bool {
        self.one_off.lock().iter().any(|t| t == tag)
    }

    /// Registered one-off tags in registration order.
    pub fn tags(&self) -> Vec<String> {
        self.one_off.lock().clone()
    }

    /// Removes a one-off tag, returning whether it was registered.
    pub fn take(&self, tag: &str) -> bool {
        let mut tags = self.one_off.lock();
        let before = tags.len();
        tags.retain(|t| t != tag);
        tags.len() != before
    }

    /// Records the user's answer to the periodic-sync permission prompt.
    ///
    /// Revoking drops every periodic registration.
    pub fn set_periodic_permission(&self, granted: bool) {
        *self.periodic_permission.lock() = granted;
        if !granted {
            self.periodic.lock().clear();
        }
    }

    /// Registers a periodic tag.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] without the permission grant or for an
    /// interval below [`MIN_PERIODIC_INTERVAL`].
    pub fn register_periodic(&self, tag: &str, interval: Duration, now: Timestamp) -> SyncResult<()> {
        if !*self.periodic_permission.lock() {
            return Err(SyncError::Config(
                "periodic background sync permission not granted".into(),
            ));
        }
        if interval < MIN_PERIODIC_INTERVAL {
            return Err(SyncError::Config(format!(
                "periodic interval {interval:?} is below the minimum of {MIN_PERIODIC_INTERVAL:?}"
            )));
        }
        self.periodic.lock().insert(
            tag.to_string(),
            PeriodicRegistration {
                interval_ms: duration_ms(interval),
                last_fired: None,
                registered_at: now,
            },
        );
        Ok(())
    }

    /// Removes a periodic tag.
    pub fn unregister_periodic(&self, tag: &str) -> bool {
        self.periodic.lock().remove(tag).is_some()
    }

    /// Periodic tags whose interval has elapsed, marking them fired at `now`.
    pub fn take_due(&self, now: Timestamp) -> Vec<String> {
        let mut due = Vec::new();
        for (tag, reg) in self.periodic.lock().iter_mut() {
            let since = reg.last_fired.unwrap_or(reg.registered_at);
            if now.saturating_sub(since) >= reg.interval_ms {
                reg.last_fired = Some(now);
                due.push(tag.clone());
            }
        }
        due
    }
}
