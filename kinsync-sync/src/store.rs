//! The remote coordination store interface.
//!
//! The store is the convergence point across a family's devices: an
//! append-only per-family event log with query-by-time and push-based
//! change notification. The engine never assumes exclusive write access
//! to it — it is externally synchronized.
//!
//! Push payloads carry event IDs only; delivery is at-least-once and a
//! follow-up [`CoordinationStore::query`] is required to fetch content.

use crate::error::SyncResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kinsync_types::{CoordinationEvent, EventId, FamilyId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A push notification that something changed in a family's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotice {
    /// The appended event's ID.
    pub event_id: EventId,
    /// The family whose log grew.
    pub family_id: FamilyId,
    /// The acting user, so receivers can skip their own writes.
    pub triggering_user_id: UserId,
}

/// The append-only remote event log, accessed through a narrow interface.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Appends an event to the family's log.
    async fn append(&self, event: &CoordinationEvent) -> SyncResult<()>;

    /// Returns the family's events, strictly after `since` when given,
    /// ordered by timestamp.
    async fn query(
        &self,
        family_id: &FamilyId,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<CoordinationEvent>>;

    /// Subscribes to change notices for a family, excluding notices for
    /// events the given user triggered themselves.
    async fn subscribe(
        &self,
        family_id: &FamilyId,
        excluding_user: &UserId,
    ) -> SyncResult<mpsc::Receiver<EventNotice>>;
}

/// An in-memory store for tests: scripted failures, inspectable log,
/// notice fan-out on append.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Subscriber {
        family_id: FamilyId,
        excluding_user: UserId,
        tx: mpsc::Sender<EventNotice>,
    }

    /// A mock `CoordinationStore`.
    ///
    /// Failures queued via [`MockStore::push_failure`] are consumed one
    /// per `append` call before any append succeeds, so tests can script
    /// "fail twice, then work".
    #[derive(Default)]
    pub struct MockStore {
        log: Mutex<Vec<CoordinationEvent>>,
        failures: Mutex<VecDeque<SyncError>>,
        subscribers: Mutex<Vec<Subscriber>>,
        append_attempts: Mutex<u32>,
    }

    impl MockStore {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Scripts the next `append` call to fail with `error`.
        pub fn push_failure(&self, error: SyncError) {
            self.failures.lock().unwrap().push_back(error);
        }

        /// Scripts the next `n` append calls to fail with a network error.
        pub fn fail_appends(&self, n: usize) {
            let mut failures = self.failures.lock().unwrap();
            for _ in 0..n {
                failures.push_back(SyncError::Network("mock offline".into()));
            }
        }

        /// Discards remaining scripted failures — "the outage ended".
        pub fn clear_failures(&self) {
            self.failures.lock().unwrap().clear();
        }

        /// Everything appended so far.
        pub fn appended(&self) -> Vec<CoordinationEvent> {
            self.log.lock().unwrap().clone()
        }

        /// Total `append` calls, including failed ones.
        pub fn append_attempts(&self) -> u32 {
            *self.append_attempts.lock().unwrap()
        }

        fn notify(&self, event: &CoordinationEvent) {
            let subscribers = self.subscribers.lock().unwrap();
            for sub in subscribers.iter() {
                if sub.family_id != event.family_id {
                    continue;
                }
                if sub.excluding_user == event.triggering_user_id {
                    continue;
                }
                let notice = EventNotice {
                    event_id: event.id,
                    family_id: event.family_id,
                    triggering_user_id: event.triggering_user_id,
                };
                // Dropped receivers just miss the notice.
                let _ = sub.tx.try_send(notice);
            }
        }
    }

    #[async_trait]
    impl CoordinationStore for MockStore {
        async fn append(&self, event: &CoordinationEvent) -> SyncResult<()> {
            *self.append_attempts.lock().unwrap() += 1;
            if let Some(error) = self.failures.lock().unwrap().pop_front() {
                return Err(error);
            }
            self.log.lock().unwrap().push(event.clone());
            self.notify(event);
            Ok(())
        }

        async fn query(
            &self,
            family_id: &FamilyId,
            since: Option<DateTime<Utc>>,
        ) -> SyncResult<Vec<CoordinationEvent>> {
            let mut events: Vec<CoordinationEvent> = self
                .log
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.family_id == *family_id)
                .filter(|e| since.is_none_or(|ts| e.timestamp > ts))
                .cloned()
                .collect();
            events.sort_by_key(|e| e.timestamp);
            Ok(events)
        }

        async fn subscribe(
            &self,
            family_id: &FamilyId,
            excluding_user: &UserId,
        ) -> SyncResult<mpsc::Receiver<EventNotice>> {
            let (tx, rx) = mpsc::channel(64);
            self.subscribers.lock().unwrap().push(Subscriber {
                family_id: *family_id,
                excluding_user: *excluding_user,
                tx,
            });
            Ok(rx)
        }
    }
}
