//! The synchronization manager — orchestrates publish, queue draining,
//! idempotent inbound intake, delta fetch, and periodic maintenance.
//!
//! Per-family history is only approximately ordered by timestamp: two
//! devices editing offline may deliver in either order. The manager makes
//! no strong-consistency promise; conflicting field writes resolve
//! last-write-wins by event timestamp at intake.

use crate::connectivity::ConnectivityObserver;
use crate::error::SyncResult;
use crate::retry::{retry, RetryPolicy};
use crate::store::CoordinationStore;
use chrono::{DateTime, Utc};
use kinsync_storage::OfflineQueue;
use kinsync_types::{CoordinationEvent, DeviceId, EventId, FamilyId, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Configuration for the synchronization manager.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retry behavior for each publish attempt.
    pub retry: RetryPolicy,
    /// How long rapid edits to the same record coalesce before publish.
    pub debounce_delay: Duration,
    /// Items per wave for bulk remote operations.
    pub batch_size: usize,
    /// How often background maintenance runs.
    pub maintenance_interval: Duration,
    /// Queue entries and processed IDs older than this are pruned.
    pub retention: Duration,
    /// Capacity of the observer broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            debounce_delay: Duration::from_millis(300),
            batch_size: 100,
            maintenance_interval: Duration::from_secs(5 * 60),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            event_channel_capacity: 256,
        }
    }
}

/// Delta-fetch progress for one family.
///
/// The checkpoint alone is not enough: a reconnecting device publishes
/// events whose creation timestamps predate it, and a strictly-after
/// query at the checkpoint would skip them forever. Fetches therefore
/// re-read a full retention window behind the checkpoint, and `seen`
/// filters the overlap back out so each event surfaces exactly once.
#[derive(Default)]
struct DeltaState {
    /// The newest event timestamp fetched so far.
    checkpoint: Option<DateTime<Utc>>,
    /// Event IDs already returned, with their timestamps for pruning.
    seen: HashMap<EventId, DateTime<Utc>>,
}

/// Orchestrates event flow between the local device and the remote store.
pub struct SyncManager {
    user_id: UserId,
    device_id: DeviceId,
    config: SyncConfig,
    queue: Arc<OfflineQueue>,
    store: Arc<dyn CoordinationStore>,
    /// Delta-fetch progress per family.
    delta: RwLock<HashMap<FamilyId, DeltaState>>,
    /// Last applied timestamp per (target entity, field) for
    /// last-write-wins conflict filtering.
    applied_fields: RwLock<HashMap<(String, String), DateTime<Utc>>>,
    /// Fan-out of uniquely processed events to observers.
    events_tx: broadcast::Sender<CoordinationEvent>,
    /// Serializes drains; a reconnect edge and the maintenance tick must
    /// not interleave over the queue.
    drain_lock: tokio::sync::Mutex<()>,
    /// Running realtime subscription tasks, keyed by family.
    realtime: Mutex<HashMap<FamilyId, JoinHandle<()>>>,
}

impl SyncManager {
    /// Creates a new manager for one device.
    pub fn new(
        user_id: UserId,
        device_id: DeviceId,
        queue: Arc<OfflineQueue>,
        store: Arc<dyn CoordinationStore>,
        config: SyncConfig,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            user_id,
            device_id,
            config,
            queue,
            store,
            delta: RwLock::new(HashMap::new()),
            applied_fields: RwLock::new(HashMap::new()),
            events_tx,
            drain_lock: tokio::sync::Mutex::new(()),
            realtime: Mutex::new(HashMap::new()),
        }
    }

    /// The local user.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The local device.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// The manager's configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Subscribes to the raw stream of uniquely processed events. Each
    /// event is delivered at most once per receiver.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.events_tx.subscribe()
    }

    /// Queue depth — the "pending sync" signal for the UI.
    pub fn pending_events(&self) -> SyncResult<usize> {
        Ok(self.queue.pending_count()?)
    }

    // ── Outbound ─────────────────────────────────────────────────

    /// Publishes an event to the remote store.
    ///
    /// Transient failures are retried with backoff; once attempts are
    /// exhausted the event lands in the offline queue and the call still
    /// succeeds — the failure is visible as queue depth, not an error.
    /// Terminal errors surface synchronously and are never queued.
    pub async fn publish(&self, event: CoordinationEvent) -> SyncResult<()> {
        let result = self.try_append(&event).await;
        match result {
            Ok(()) => {
                debug!(event_id = %event.id, kind = %event.kind, "published event");
                Ok(())
            }
            Err(error) if error.is_retryable() => {
                warn!(
                    event_id = %event.id,
                    %error,
                    "publish failed after retries, queueing for later drain"
                );
                self.queue.enqueue(&event)?;
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    async fn try_append(&self, event: &CoordinationEvent) -> SyncResult<()> {
        let store = self.store.clone();
        retry(&self.config.retry, || {
            let store = store.clone();
            async move { store.append(event).await }
        })
        .await
    }

    /// Drains the offline queue in enqueue order.
    ///
    /// Each event gets a bounded retry. Permanently failing events are
    /// dropped: they will never succeed. Everything else stays queued for
    /// the next drain, and draining moves on to the next event — one bad
    /// event never blocks the rest. Returns the number of events
    /// published.
    pub async fn drain_queue(&self) -> SyncResult<usize> {
        let _guard = self.drain_lock.lock().await;

        let pending = self.queue.all_pending()?;
        if pending.is_empty() {
            return Ok(0);
        }
        info!(count = pending.len(), "draining offline queue");

        let mut published = 0;
        for event in pending {
            match self.try_append(&event).await {
                Ok(()) => {
                    self.queue.dequeue(&event.id)?;
                    published += 1;
                }
                Err(error) if error.is_permanent() => {
                    warn!(
                        event_id = %event.id,
                        %error,
                        "dropping event that will never publish"
                    );
                    self.queue.dequeue(&event.id)?;
                }
                Err(error) => {
                    warn!(event_id = %event.id, %error, "event stays queued");
                }
            }
        }

        Ok(published)
    }

    // ── Inbound ──────────────────────────────────────────────────

    /// Idempotent intake of an event delivered at-least-once.
    ///
    /// Returns `Ok(true)` when the event was applied and observers were
    /// notified, `Ok(false)` for a duplicate delivery (no-op). On failure
    /// the event is queued for a later retry and the error propagates so
    /// the caller may retry itself.
    pub async fn handle_event(&self, event: CoordinationEvent) -> SyncResult<bool> {
        if self.queue.has_processed(&event.id)? {
            debug!(event_id = %event.id, "duplicate delivery, skipping");
            return Ok(false);
        }

        match self.apply_event(&event).await {
            Ok(()) => {
                self.queue.mark_processed(&event.id)?;
                Ok(true)
            }
            Err(error) => {
                self.queue.enqueue(&event)?;
                Err(error)
            }
        }
    }

    /// Applies last-write-wins filtering and notifies observers.
    ///
    /// Fields already overwritten by a newer event are stripped from the
    /// broadcast copy; an event whose fields are all stale is recorded as
    /// processed but not re-broadcast with stale data.
    async fn apply_event(&self, event: &CoordinationEvent) -> SyncResult<()> {
        let mut applied = event.clone();
        {
            let mut fields = self.applied_fields.write().await;
            applied.changes.retain(|field, _| {
                let key = (event.target.entity_id.clone(), field.clone());
                match fields.get(&key) {
                    Some(seen) if *seen >= event.timestamp => false,
                    _ => {
                        fields.insert(key, event.timestamp);
                        true
                    }
                }
            });
        }

        if applied.changes.is_empty() && !event.changes.is_empty() {
            debug!(event_id = %event.id, "all fields superseded by newer events");
            return Ok(());
        }

        // No receivers is fine; observers come and go.
        let _ = self.events_tx.send(applied);
        Ok(())
    }

    // ── Delta sync ───────────────────────────────────────────────

    /// Fetches the family's events this device has not yet seen,
    /// bounding per-sync cost as history grows.
    ///
    /// The query reaches a full retention window behind the checkpoint:
    /// a device may publish an event up to `retention` after creating it
    /// offline, so its timestamp can predate the checkpoint. Events
    /// already returned by an earlier fetch are filtered out.
    pub async fn fetch_delta_changes(
        &self,
        family_id: &FamilyId,
    ) -> SyncResult<Vec<CoordinationEvent>> {
        let since = {
            let delta = self.delta.read().await;
            delta
                .get(family_id)
                .and_then(|state| state.checkpoint)
                .map(|checkpoint| checkpoint - self.config.retention)
        };
        let fetched = self.store.query(family_id, since).await?;

        let mut delta = self.delta.write().await;
        let state = delta.entry(*family_id).or_default();
        let mut fresh = Vec::with_capacity(fetched.len());
        for event in fetched {
            if state.seen.contains_key(&event.id) {
                continue;
            }
            state.seen.insert(event.id, event.timestamp);
            if state.checkpoint.is_none_or(|cp| event.timestamp > cp) {
                state.checkpoint = Some(event.timestamp);
            }
            fresh.push(event);
        }
        if let Some(checkpoint) = state.checkpoint {
            // IDs at or below the query floor can never be fetched again.
            let floor = checkpoint - self.config.retention;
            state.seen.retain(|_, ts| *ts > floor);
        }

        debug!(%family_id, count = fresh.len(), "delta fetch");
        Ok(fresh)
    }

    /// Fetches events strictly after an explicit timestamp, without
    /// touching the checkpoint.
    pub async fn fetch_since(
        &self,
        family_id: &FamilyId,
        since: DateTime<Utc>,
    ) -> SyncResult<Vec<CoordinationEvent>> {
        self.store.query(family_id, Some(since)).await
    }

    // ── Maintenance & background tasks ───────────────────────────

    /// One maintenance pass: drain the queue, then prune queue entries and
    /// processed IDs older than the retention window.
    pub async fn run_maintenance(&self) -> SyncResult<()> {
        if let Err(error) = self.drain_queue().await {
            warn!(%error, "maintenance drain failed");
        }

        let cutoff = Utc::now() - self.config.retention;
        let dropped = self.queue.prune_older_than(cutoff)?;
        let pruned = self.queue.prune_processed_older_than(cutoff)?;
        if dropped > 0 || pruned > 0 {
            info!(dropped, pruned, "pruned entries past retention");
        }
        Ok(())
    }

    /// Spawns the task that drains the queue on every reconnect edge.
    pub fn spawn_connectivity_drain(
        self: &Arc<Self>,
        mut observer: ConnectivityObserver,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while observer.wait_for_online().await.is_ok() {
                info!("connectivity restored, draining offline queue");
                if let Err(error) = manager.drain_queue().await {
                    warn!(%error, "drain after reconnect failed");
                }
            }
        })
    }

    /// Spawns the periodic maintenance task.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = self.clone();
        let period = manager.config.maintenance_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the first
            // pass happens one full period after startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(error) = manager.run_maintenance().await {
                    warn!(%error, "maintenance pass failed");
                }
            }
        })
    }

    // ── Realtime subscriptions ───────────────────────────────────

    /// Starts following a family's remote log: on each push notice the
    /// manager delta-fetches and feeds every new event through
    /// [`SyncManager::handle_event`]. Replaces any existing subscription
    /// for the family.
    pub async fn start_realtime(self: &Arc<Self>, family_id: FamilyId) -> SyncResult<()> {
        let mut notices = self.store.subscribe(&family_id, &self.user_id).await?;
        let manager = self.clone();

        let handle = tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                // The store already excludes our writes; keep the guard in
                // case a store implementation doesn't.
                if notice.triggering_user_id == manager.user_id {
                    continue;
                }
                match manager.fetch_delta_changes(&notice.family_id).await {
                    Ok(events) => {
                        for event in events {
                            if event.triggering_user_id == manager.user_id {
                                continue;
                            }
                            if let Err(error) = manager.handle_event(event).await {
                                warn!(%error, "failed to apply inbound event");
                            }
                        }
                    }
                    Err(error) => {
                        warn!(%error, "delta fetch after push notice failed");
                    }
                }
            }
            debug!(%family_id, "realtime subscription ended");
        });

        if let Some(previous) = self.realtime.lock().unwrap().insert(family_id, handle) {
            previous.abort();
        }
        info!(%family_id, "realtime updates started");
        Ok(())
    }

    /// Stops following a family's remote log. Stopping a family that was
    /// never started is a no-op.
    pub fn stop_realtime(&self, family_id: &FamilyId) {
        if let Some(handle) = self.realtime.lock().unwrap().remove(family_id) {
            handle.abort();
            info!(%family_id, "realtime updates stopped");
        }
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        for (_, handle) in self.realtime.lock().unwrap().drain() {
            handle.abort();
        }
    }
}
