//! The coordination facade — the single entry point other subsystems use
//! to publish or observe coordination events.
//!
//! Explicitly constructed and dependency-injected: pass an instance
//! through constructors rather than reaching for a process-wide global.

use crate::error::{SyncError, SyncResult};
use crate::manager::SyncManager;
use crate::perf::{process_batch, Debouncer};
use crate::permission::{Action, PermissionGate};
use chrono::{DateTime, Utc};
use kinsync_types::{CoordinationEvent, FamilyId, UserId};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Composes the permission gate, the performance layer, and the
/// synchronization manager behind four operations plus lifecycle hooks.
pub struct CoordinationFacade {
    gate: PermissionGate,
    manager: Arc<SyncManager>,
    debouncer: Debouncer,
}

impl CoordinationFacade {
    /// Creates a facade over an already-constructed gate and manager.
    pub fn new(gate: PermissionGate, manager: Arc<SyncManager>) -> Self {
        Self {
            gate,
            manager,
            debouncer: Debouncer::new(),
        }
    }

    /// The underlying manager, for wiring background tasks.
    pub fn manager(&self) -> &Arc<SyncManager> {
        &self.manager
    }

    async fn check_publish(&self, event: &CoordinationEvent) -> SyncResult<()> {
        event
            .validate()
            .map_err(|e| SyncError::MalformedEvent(e.to_string()))?;
        // The caller authorized the underlying mutation; this is the
        // multi-device write boundary, so re-check here.
        self.gate
            .authorize(&event.triggering_user_id, &event.family_id, Action::Edit)
            .await
    }

    /// Publishes an event, coalescing rapid repeated edits to the same
    /// record: only the last publish within the debounce window reaches
    /// the remote store.
    ///
    /// Authorization and validation run synchronously — a denied caller
    /// gets the error before anything is scheduled.
    pub async fn publish(&self, event: CoordinationEvent) -> SyncResult<()> {
        self.check_publish(&event).await?;

        let key = format!("{}:{}:{}", event.family_id, event.target.entity, event.target.entity_id);
        let delay = self.manager.config().debounce_delay;
        let manager = self.manager.clone();
        self.debouncer.debounce(key, delay, move || async move {
            if let Err(error) = manager.publish(event).await {
                warn!(%error, "debounced publish failed");
            }
        });
        Ok(())
    }

    /// Publishes immediately, bypassing the debounce window. For writes
    /// that must not coalesce (e.g. a redemption confirmation).
    pub async fn publish_now(&self, event: CoordinationEvent) -> SyncResult<()> {
        self.check_publish(&event).await?;
        self.manager.publish(event).await
    }

    /// Publishes many events in bounded concurrent waves, bypassing the
    /// debounce window. For bulk changes such as recategorizing a whole
    /// set of apps at once. Returns one result per event, in input order.
    pub async fn publish_batch(
        &self,
        events: Vec<CoordinationEvent>,
    ) -> Vec<SyncResult<()>> {
        let mut checked = Vec::with_capacity(events.len());
        for event in events {
            checked.push((self.check_publish(&event).await, event));
        }

        let batch_size = self.manager.config().batch_size;
        process_batch(checked, batch_size, |(check, event)| async move {
            check?;
            self.manager.publish(event).await
        })
        .await
    }

    /// Subscribes to a family's processed events, excluding those the
    /// given user triggered themselves. Each uniquely processed event is
    /// delivered once; duplicates never reach the subscriber.
    pub fn subscribe(&self, family_id: FamilyId, excluding_user: UserId) -> EventSubscription {
        EventSubscription {
            rx: self.manager.subscribe_events(),
            family_id,
            excluding_user,
        }
    }

    /// Fetches a family's events strictly after `since`.
    pub async fn fetch_since(
        &self,
        family_id: &FamilyId,
        since: DateTime<Utc>,
    ) -> SyncResult<Vec<CoordinationEvent>> {
        self.manager.fetch_since(family_id, since).await
    }

    /// Starts following a family's remote log.
    pub async fn start_realtime(&self, family_id: FamilyId) -> SyncResult<()> {
        self.manager.start_realtime(family_id).await
    }

    /// Stops following a family's remote log.
    pub fn stop_realtime(&self, family_id: &FamilyId) {
        self.manager.stop_realtime(family_id);
    }
}

/// A filtered stream of coordination events for one family.
pub struct EventSubscription {
    rx: broadcast::Receiver<CoordinationEvent>,
    family_id: FamilyId,
    excluding_user: UserId,
}

impl EventSubscription {
    /// Receives the next matching event, or `None` once the engine shuts
    /// down.
    pub async fn recv(&mut self) -> Option<CoordinationEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if event.family_id == self.family_id
                        && event.triggering_user_id != self.excluding_user
                    {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
