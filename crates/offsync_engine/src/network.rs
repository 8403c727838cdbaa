//! Connectivity tracking.
//!
//! The platform "online" flag is only a hint. A change is acted on once it
//! has held for the debounce window, and an online hint must additionally
//! pass a reachability check before the link is declared usable.

use crate::transport::SyncTransport;
use offsync_core::{duration_ms, Clock, EventBus, Subscription};
use offsync_protocol::Timestamp;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Lightweight check that the sync server answers.
pub trait ReachabilityCheck: Send + Sync {
    /// Returns true when a request would likely get through.
    fn is_reachable(&self) -> bool;
}

/// Checks through a transport's own reachability check.
pub struct TransportReachability<T: SyncTransport>(pub Arc<T>);

impl<T: SyncTransport> ReachabilityCheck for TransportReachability<T> {
    fn is_reachable(&self) -> bool {
        self.0.is_reachable()
    }
}

/// Confirmed link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Link confirmed usable.
    Online,
    /// Link down or unconfirmed.
    Offline,
}

/// Debounced connectivity transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    /// The link became usable.
    BecameOnline {
        /// When the transition was confirmed.
        at: Timestamp,
    },
    /// The link was lost.
    BecameOffline {
        /// When the transition was confirmed.
        at: Timestamp,
    },
}

#[derive(Debug)]
struct MonitorState {
    confirmed: Connectivity,
    /// Latest platform hint that differs from `confirmed`, and when it arrived.
    candidate: Option<(Connectivity, Timestamp)>,
}

/// Tracks connectivity and publishes debounced transitions.
pub struct NetworkMonitor {
    state: Mutex<MonitorState>,
    reachability: Arc<dyn ReachabilityCheck>,
    clock: Arc<dyn Clock>,
    debounce_ms: u64,
    events: EventBus<NetworkEvent>,
}

impl NetworkMonitor {
    /// Creates a monitor starting in `initial`.
    pub fn new(
        initial: Connectivity,
        reachability: Arc<dyn ReachabilityCheck>,
        clock: Arc<dyn Clock>,
        debounce: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(MonitorState {
                confirmed: initial,
                candidate: None,
            }),
            reachability,
            clock,
            debounce_ms: duration_ms(debounce),
            events: EventBus::new(),
        }
    }

    /// Current confirmed state.
    pub fn connectivity(&self) -> Connectivity {
        self.state.lock().confirmed
    }

    /// Whether the link is confirmed usable.
    pub fn is_online(&self) -> bool {
        self.connectivity() == Connectivity::Online
    }

    /// Subscribes to transitions.
    pub fn subscribe(&self) -> Subscription<NetworkEvent> {
        self.events.subscribe()
    }

    /// Records a platform online/offline signal.
    ///
    /// Nothing is published here; call [`poll`](Self::poll) once the
    /// debounce window may have passed. A signal that returns to the
    /// confirmed state before then cancels the pending transition.
    pub fn platform_signal(&self, online: bool) {
        let hinted = if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        if hinted == state.confirmed {
            if state.candidate.take().is_some() {
                debug!(?hinted, "connectivity flap cancelled");
            }
        } else {
            state.candidate = Some((hinted, now));
        }
    }

    /// Confirms a pending transition whose debounce window has elapsed.
    ///
    /// Going online requires the check to succeed; a failed check keeps the
    /// candidate so that a later poll tries again.
    pub fn poll(&self) -> Option<NetworkEvent> {
        let now = self.clock.now_ms();
        let target = {
            let state = self.state.lock();
            let (target, since) = state.candidate?;
            if now.saturating_sub(since) < self.debounce_ms {
                return None;
            }
            target
        };

        // Check outside the lock: it may do I/O.
        if target == Connectivity::Online && !self.reachability.is_reachable() {
            debug!("platform reports online but server is unreachable");
            return None;
        }

        let mut state = self.state.lock();
        match state.candidate {
            Some((candidate, _)) if candidate == target => {
                state.candidate = None;
                Some(self.confirm(&mut state, target, now))
            }
            // A newer signal arrived while probing.
            _ => None,
        }
    }

    /// Checks immediately, bypassing the debounce window.
    ///
    /// Used for manual syncs. Returns the event if the state changed.
    pub fn check_now(&self) -> Option<NetworkEvent> {
        let reachable = self.reachability.is_reachable();
        let now = self.clock.now_ms();
        let target = if reachable {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        let mut state = self.state.lock();
        state.candidate = None;
        if state.confirmed == target {
            None
        } else {
            Some(self.confirm(&mut state, target, now))
        }
    }

    fn confirm(&self, state: &mut MonitorState, target: Connectivity, now: Timestamp) -> NetworkEvent {
        state.confirmed = target;
        let event = match target {
            Connectivity::Online => NetworkEvent::BecameOnline { at: now },
            Connectivity::Offline => NetworkEvent::BecameOffline { at: now },
        };
        info!(?target, "connectivity changed");
        self.events.publish(event);
        event
    }
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("state", &*self.state.lock())
            .field("debounce_ms", &self.debounce_ms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_core::ManualClock;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Reachable(AtomicBool);

    impl ReachabilityCheck for Reachable {
        fn is_reachable(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn monitor(reachable: bool) -> (NetworkMonitor, Arc<ManualClock>, Arc<Reachable>) {
        let clock = Arc::new(ManualClock::new(0));
        let reachability = Arc::new(Reachable(AtomicBool::new(reachable)));
        let monitor = NetworkMonitor::new(
            Connectivity::Offline,
            reachability.clone(),
            clock.clone(),
            Duration::from_secs(2),
        );
        (monitor, clock, reachability)
    }

    #[test]
    fn online_signal_waits_for_debounce() {
        let (monitor, clock, _) = monitor(true);
        let events = monitor.subscribe();

        monitor.platform_signal(true);
        assert_eq!(monitor.poll(), None);
        assert!(!monitor.is_online());

        clock.advance(Duration::from_secs(2));
        assert_eq!(monitor.poll(), Some(NetworkEvent::BecameOnline { at: 2_000 }));
        assert!(monitor.is_online());
        assert_eq!(events.drain(), vec![NetworkEvent::BecameOnline { at: 2_000 }]);
    }

    #[test]
    fn flapping_link_produces_no_events() {
        let (monitor, clock, _) = monitor(true);
        let events = monitor.subscribe();

        for _ in 0..5 {
            monitor.platform_signal(true);
            clock.advance(Duration::from_millis(500));
            monitor.platform_signal(false);
            clock.advance(Duration::from_millis(500));
            assert_eq!(monitor.poll(), None);
        }
        clock.advance(Duration::from_secs(10));
        assert_eq!(monitor.poll(), None);
        assert!(events.drain().is_empty());
    }

    #[test]
    fn online_hint_needs_reachability() {
        let (monitor, clock, reachability) = monitor(false);
        monitor.platform_signal(true);
        clock.advance(Duration::from_secs(3));
        assert_eq!(monitor.poll(), None);
        assert!(!monitor.is_online());

        reachability.0.store(true, Ordering::SeqCst);
        assert!(matches!(monitor.poll(), Some(NetworkEvent::BecameOnline { .. })));
    }

    #[test]
    fn going_offline_skips_the_check() {
        let (monitor, clock, _) = monitor(true);
        assert!(monitor.check_now().is_some());
        assert!(monitor.is_online());

        monitor.platform_signal(false);
        clock.advance(Duration::from_secs(2));
        assert!(matches!(monitor.poll(), Some(NetworkEvent::BecameOffline { .. })));
        assert_eq!(monitor.connectivity(), Connectivity::Offline);
    }

    #[test]
    fn check_now_reports_only_changes() {
        let (monitor, _, reachability) = monitor(false);
        assert_eq!(monitor.check_now(), None);
        reachability.0.store(true, Ordering::SeqCst);
        assert!(monitor.check_now().is_some());
        assert_eq!(monitor.check_now(), None);
    }
}
