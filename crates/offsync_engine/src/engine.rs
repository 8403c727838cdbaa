//! The client-facing sync engine.

use crate::config::{ConflictPolicy, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::network::{Connectivity, NetworkEvent, NetworkMonitor, TransportReachability};
use crate::processor::QueueProcessor;
use crate::resolver::ConflictResolver;
use crate::transport::SyncTransport;
use crate::trigger::{
    BackgroundSyncRegistry, TriggerDecision, TriggerReason, TriggerState, SyncTrigger,
};
use offsync_core::{EventBus, OperationQueue, QueueEvent, Subscription};
use offsync_protocol::{
    HttpMethod, Operation, OperationId, OperationPatch, OperationStatus, ProcessSummary,
    ResolutionStrategy, ResolvedOperation, Timestamp,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Statistics about sync operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Drains that ran to completion.
    pub drains_completed: u64,
    /// Drains that ended with an error.
    pub drains_failed: u64,
    /// Triggers folded into a running drain.
    pub reruns_coalesced: u64,
    /// Totals over all drains.
    pub totals: ProcessSummary,
    /// When the last drain finished.
    pub last_sync_at: Option<Timestamp>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// What a drain request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The drain ran; counts cover every pass including reruns.
    Completed(ProcessSummary),
    /// A drain was already running and will make another pass.
    Coalesced,
    /// The link is down; nothing was sent.
    Offline,
    /// Nothing was scheduled, or the tag was not registered.
    Skipped,
}

/// The sync engine: queue front end, drain coordinator and conflict hub.
///
/// Construct one per queue and share it by `Arc`. Every mutation of queue
/// records goes through the queue's atomic API, so a foreground caller and
/// the background [`SyncScheduler`](crate::SyncScheduler) can both hold it.
pub struct SyncEngine<T: SyncTransport> {
    config: SyncConfig,
    queue: Arc<OperationQueue>,
    transport: Arc<T>,
    processor: QueueProcessor<T>,
    resolver: ConflictResolver<T>,
    network: NetworkMonitor,
    trigger: SyncTrigger,
    background: BackgroundSyncRegistry,
    events: EventBus<SyncEvent>,
    queue_events: Mutex<Subscription<QueueEvent>>,
    stats: RwLock<SyncStats>,
    wake: Notify,
    shut_down: AtomicBool,
}

impl<T: SyncTransport + 'static> SyncEngine<T> {
    /// Creates an engine over an opened queue.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if `config` fails validation.
    pub fn new(config: SyncConfig, queue: Arc<OperationQueue>, transport: Arc<T>) -> SyncResult<Self> {
        config.validate()?;

        let initial = if config.network.assume_online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        let network = NetworkMonitor::new(
            initial,
            Arc::new(TransportReachability(Arc::clone(&transport))),
            Arc::clone(queue.clock()),
            config.network.debounce,
        );
        let processor = QueueProcessor::new(Arc::clone(&queue), Arc::clone(&transport), config.retry.clone())
            .with_batch_size(config.batch_size);
        let resolver = ConflictResolver::new(Arc::clone(&queue), Arc::clone(&transport));
        let queue_events = Mutex::new(queue.subscribe());

        info!(client = %config.client_id, server = %config.server_url, "sync engine created");

        Ok(Self {
            config,
            queue,
            transport,
            processor,
            resolver,
            network,
            trigger: SyncTrigger::new(),
            background: BackgroundSyncRegistry::new(),
            events: EventBus::new(),
            queue_events,
            stats: RwLock::new(SyncStats::default()),
            wake: Notify::new(),
            shut_down: AtomicBool::new(false),
        })
    }
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The underlying queue.
    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    /// The transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> Subscription<SyncEvent> {
        self.events.subscribe()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Single-flight trigger state.
    pub fn trigger_state(&self) -> TriggerState {
        self.trigger.state()
    }

    /// Whether the link is confirmed usable.
    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    // ---- queue API -------------------------------------------------------

    /// Durably queues a mutating request and returns the stored record.
    ///
    /// Never touches the network. When online, a drain is scheduled and the
    /// scheduler is woken.
    ///
    /// # Errors
    ///
    /// - [`SyncError::StorageUnavailable`] if the queue cannot persist it;
    ///   nothing was queued
    /// - [`SyncError::ShutDown`] after [`shutdown`](Self::shutdown)
    pub fn enqueue(
        &self,
        url: &str,
        method: HttpMethod,
        body: Option<Value>,
        headers: Option<BTreeMap<String, String>>,
    ) -> SyncResult<Operation> {
        self.ensure_running()?;
        let op = Operation::new(
            self.config.client_id,
            method,
            url,
            body,
            self.queue.clock().now_ms(),
        )
        .with_headers(headers.unwrap_or_default());
        self.enqueue_operation(op)
    }

    /// Queues a fully built operation. Its status and retry count are reset.
    ///
    /// # Errors
    ///
    /// As [`enqueue`](Self::enqueue), plus [`SyncError::Queue`] for a
    /// duplicate id.
    pub fn enqueue_operation(&self, op: Operation) -> SyncResult<Operation> {
        self.ensure_running()?;
        let entity = op.entity_key();
        let id = self.queue.enqueue(op)?;
        self.forward_queue_events();
        self.events.publish(SyncEvent::OperationQueued { id, entity });

        if self.config.trigger.sync_on_enqueue && self.network.is_online() {
            self.schedule(TriggerReason::Enqueue);
        }

        self.queue
            .get(&id)
            .ok_or(SyncError::Queue(offsync_core::CoreError::OperationNotFound(id)))
    }

    /// Operations not yet settled: `pending`, `processing` and `error`.
    pub fn get_pending_operations(&self) -> Vec<Operation> {
        self.queue
            .list_all()
            .into_iter()
            .filter(|op| {
                matches!(
                    op.status,
                    OperationStatus::Pending | OperationStatus::Processing | OperationStatus::Error
                )
            })
            .collect()
    }

    /// Every queued operation, oldest first.
    pub fn get_all_operations(&self) -> Vec<Operation> {
        self.queue.list_all()
    }

    /// Operations needing the user: `failed` and `conflict`.
    pub fn get_attention_operations(&self) -> Vec<Operation> {
        self.queue
            .list_all()
            .into_iter()
            .filter(|op| op.status.needs_attention())
            .collect()
    }

    /// Looks up one operation.
    pub fn get_operation(&self, id: &OperationId) -> Option<Operation> {
        self.queue.get(id)
    }

    /// Atomically updates one operation.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Queue`] for an unknown id
    /// - [`SyncError::InvalidStateTransition`] if the move is not allowed
    /// - [`SyncError::StorageUnavailable`] if it cannot be persisted
    pub fn update_operation_status(
        &self,
        id: &OperationId,
        status: OperationStatus,
        patch: Option<OperationPatch>,
    ) -> SyncResult<()> {
        self.queue
            .update_status(id, status, patch.unwrap_or_default())?;
        self.forward_queue_events();
        Ok(())
    }

    /// Moves a `failed`, `conflict` or `error` operation back to `pending`
    /// with its retry count reset.
    ///
    /// # Errors
    ///
    /// As [`update_operation_status`](Self::update_operation_status).
    pub fn retry_operation(&self, id: &OperationId) -> SyncResult<Operation> {
        self.ensure_running()?;
        let op = self.queue.update_status(
            id,
            OperationStatus::Pending,
            OperationPatch::new().retries(0).clear_error(),
        )?;
        self.forward_queue_events();
        info!(%id, "operation requeued by caller");
        if self.network.is_online() {
            self.schedule(TriggerReason::Manual);
        }
        Ok(op)
    }

    /// Removes one settled or stuck operation.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Queue`] if it is still in flight or unknown.
    pub fn purge_operation(&self, id: &OperationId) -> SyncResult<()> {
        self.queue.purge(id)?;
        self.forward_queue_events();
        Ok(())
    }

    /// Removes every `failed` operation.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StorageUnavailable`] on journal failure.
    pub fn purge_failed(&self) -> SyncResult<usize> {
        let purged = self.queue.purge_failed()?;
        self.forward_queue_events();
        Ok(purged)
    }

    /// Removes terminal operations older than the retention window.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StorageUnavailable`] on journal failure.
    pub fn cleanup(&self) -> SyncResult<usize> {
        let purged = self.queue.purge_completed()?;
        self.forward_queue_events();
        Ok(purged)
    }

    // ---- conflicts -------------------------------------------------------

    /// Resolves the conflict `id` takes part in.
    ///
    /// # Errors
    ///
    /// See [`ConflictResolver::resolve`].
    pub fn resolve_conflict(
        &self,
        id: OperationId,
        strategy: &ResolutionStrategy,
    ) -> SyncResult<ResolvedOperation> {
        self.ensure_running()?;
        let result = self.resolver.resolve(id, strategy);
        self.forward_queue_events();
        result
    }

    // ---- triggers --------------------------------------------------------

    /// Feeds a platform online/offline signal to the network monitor.
    pub fn set_platform_online(&self, online: bool) {
        self.network.platform_signal(online);
        self.wake.notify_one();
    }

    /// Housekeeping step, called by the scheduler.
    ///
    /// Confirms debounced connectivity changes, fires due periodic
    /// registrations and runs a scheduled drain.
    ///
    /// # Errors
    ///
    /// Errors of the drain it ran.
    pub fn tick(&self) -> SyncResult<DrainOutcome> {
        self.ensure_running()?;
        if let Some(event) = self.network.poll() {
            self.on_network_event(event);
        }

        let now = self.queue.clock().now_ms();
        for tag in self.background.take_due(now) {
            debug!(%tag, "periodic sync due");
            self.schedule(TriggerReason::Periodic(tag));
        }

        self.run_scheduled()
    }

    /// Runs the scheduled drain, if any.
    ///
    /// # Errors
    ///
    /// Errors of the drain.
    pub fn run_scheduled(&self) -> SyncResult<DrainOutcome> {
        match self.trigger.scheduled_reason() {
            Some(reason) => self.drain(reason),
            None => Ok(DrainOutcome::Skipped),
        }
    }

    /// Manual "sync now". Checks reachability first, ignoring the debounce.
    ///
    /// # Errors
    ///
    /// Errors of the drain.
    pub fn sync_now(&self) -> SyncResult<DrainOutcome> {
        self.ensure_running()?;
        if let Some(event) = self.network.check_now() {
            self.on_network_event(event);
        }
        self.drain(TriggerReason::Manual)
    }

    /// Registers a one-off background sync tag.
    pub fn register_background_sync(&self, tag: &str) {
        self.background.register(tag);
    }

    /// Handles a platform background-sync wakeup for `tag`.
    ///
    /// The tag stays registered until a drain leaves nothing to send, so
    /// that the platform fires it again after a partial run.
    ///
    /// # Errors
    ///
    /// Errors of the drain.
    pub fn handle_background_sync(&self, tag: &str) -> SyncResult<DrainOutcome> {
        self.ensure_running()?;
        if !self.background.is_registered(tag) {
            debug!(%tag, "ignoring unregistered background sync");
            return Ok(DrainOutcome::Skipped);
        }
        if let Some(event) = self.network.check_now() {
            self.on_network_event(event);
        }
        let outcome = self.drain(TriggerReason::BackgroundSync(tag.to_string()))?;
        if matches!(outcome, DrainOutcome::Completed(_)) && self.queue.drainable().is_empty() {
            self.background.take(tag);
        }
        Ok(outcome)
    }

    /// Records the periodic-sync permission answer.
    pub fn set_periodic_sync_permission(&self, granted: bool) {
        self.background.set_periodic_permission(granted);
    }

    /// Registers a periodic sync.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] without permission or for an interval
    /// under one hour.
    pub fn register_periodic_sync(&self, tag: &str, interval: Duration) -> SyncResult<()> {
        self.background
            .register_periodic(tag, interval, self.queue.clock().now_ms())
    }

    /// Removes a periodic sync registration.
    pub fn unregister_periodic_sync(&self, tag: &str) -> bool {
        self.background.unregister_periodic(tag)
    }

    /// Stops accepting work and wakes the scheduler so it can exit.
    pub fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            info!("sync engine shut down");
            self.trigger.cancel_scheduled();
            self.wake.notify_one();
        }
    }

    pub(crate) async fn wait_for_work(&self) {
        self.wake.notified().await;
    }

    // ---- internals -------------------------------------------------------

    fn ensure_running(&self) -> SyncResult<()> {
        if self.is_shut_down() {
            Err(SyncError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn schedule(&self, reason: TriggerReason) {
        match self.trigger.request(reason.clone()) {
            TriggerDecision::Schedule => {
                debug!(%reason, "drain scheduled");
                self.wake.notify_one();
            }
            TriggerDecision::AlreadyScheduled => {}
            TriggerDecision::Coalesced => {
                self.stats.write().reruns_coalesced += 1;
                self.events.publish(SyncEvent::RerunCoalesced { reason });
            }
        }
    }

    fn on_network_event(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::BecameOnline { at } => {
                self.events.publish(SyncEvent::BecameOnline { at });
                if self.config.trigger.sync_on_reconnect {
                    self.schedule(TriggerReason::Reconnect);
                }
            }
            NetworkEvent::BecameOffline { at } => {
                self.events.publish(SyncEvent::BecameOffline { at });
                self.trigger.cancel_scheduled();
            }
        }
    }

    fn drain(&self, reason: TriggerReason) -> SyncResult<DrainOutcome> {
        self.ensure_running()?;
        if !self.network.is_online() {
            self.trigger.cancel_scheduled();
            debug!(%reason, "offline, drain skipped");
            return Ok(DrainOutcome::Offline);
        }

        let Some(mut run) = self.trigger.begin(reason.clone()) else {
            debug!(%reason, "drain already running, coalesced");
            self.stats.write().reruns_coalesced += 1;
            self.events.publish(SyncEvent::RerunCoalesced { reason });
            return Ok(DrainOutcome::Coalesced);
        };

        info!(%reason, "drain started");
        self.events.publish(SyncEvent::SyncStarted {
            reason: reason.clone(),
        });

        let mut total = ProcessSummary::default();
        let result = loop {
            match self.drain_pass() {
                Ok(summary) => total.merge(&summary),
                Err(e) => break Err(e),
            }
            if !run.finish_pass() {
                break self.queue.purge_completed().map_err(SyncError::from);
            }
            debug!(%reason, "rerun requested, draining again");
        };
        drop(run);
        self.forward_queue_events();

        let now = self.queue.clock().now_ms();
        match result {
            Ok(_) => {
                {
                    let mut stats = self.stats.write();
                    stats.drains_completed += 1;
                    stats.totals.merge(&total);
                    stats.last_sync_at = Some(now);
                }
                info!(
                    %reason,
                    succeeded = total.succeeded,
                    failed = total.failed,
                    conflicted = total.conflicted,
                    retrying = total.retrying,
                    superseded = total.superseded,
                    "drain finished"
                );
                self.events.publish(SyncEvent::SyncFinished {
                    reason,
                    summary: Some(total),
                    error: None,
                });
                Ok(DrainOutcome::Completed(total))
            }
            Err(e) => {
                {
                    let mut stats = self.stats.write();
                    stats.drains_failed += 1;
                    stats.totals.merge(&total);
                    stats.last_error = Some(e.to_string());
                }
                warn!(%reason, error = %e, "drain aborted");
                if self.trigger.state() == TriggerState::Scheduled {
                    // Requests made during the failed pass still stand.
                    self.wake.notify_one();
                }
                self.events.publish(SyncEvent::SyncFinished {
                    reason,
                    summary: None,
                    error: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }

    fn drain_pass(&self) -> SyncResult<ProcessSummary> {
        let report = self.processor.process_pending();
        self.forward_queue_events();
        let report = report?;

        for (id, payload) in &report.conflicts {
            self.events.publish(SyncEvent::ConflictDetected {
                id: *id,
                payload: payload.clone().map(Box::new),
            });
        }

        if self.config.conflict_policy == ConflictPolicy::AutoLastWriteWins {
            for (id, _) in &report.conflicts {
                match self.resolver.resolve(*id, &ResolutionStrategy::LastWriteWins) {
                    Ok(resolved) => debug!(%id, winner = %resolved.winner, "auto-resolved"),
                    Err(e) if e.is_storage_failure() => return Err(e),
                    Err(e) => warn!(%id, error = %e, "automatic resolution failed"),
                }
            }
            self.forward_queue_events();
        }

        Ok(report.summary)
    }

    fn forward_queue_events(&self) {
        let pending = self.queue_events.lock().drain();
        for event in pending {
            match event {
                QueueEvent::StatusChanged { id, from, to } => {
                    self.events.publish(SyncEvent::StatusChanged { id, from, to });
                }
                QueueEvent::Purged { ids } => {
                    self.events.publish(SyncEvent::OperationsPurged { ids });
                }
                QueueEvent::Enqueued { .. } => {}
            }
        }
    }
}

impl<T: SyncTransport> std::fmt::Debug for SyncEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("client_id", &self.config.client_id)
            .field("online", &self.network.is_online())
            .field("trigger", &self.trigger.state())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
