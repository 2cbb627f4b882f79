//! The durable offline queue and processed-event set.
//!
//! All access goes through one `Mutex<Connection>` — the single
//! serialization point for the only mutable shared state on a device.
//! Concurrent enqueue/dequeue/prune calls never interleave partially.

use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, SecondsFormat, Utc};
use kinsync_types::{CoordinationEvent, EventId};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Durable buffer of unpublished events plus the processed-event-ID set.
pub struct OfflineQueue {
    conn: Arc<Mutex<Connection>>,
}

impl OfflineQueue {
    /// Opens (or creates) the queue database at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        let queue = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        queue.init_schema()?;
        Ok(queue)
    }

    /// Opens an in-memory queue (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let queue = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        queue.init_schema()?;
        Ok(queue)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS offline_queue (
                event_id TEXT PRIMARY KEY,
                family_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                enqueued_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS processed_events (
                event_id TEXT PRIMARY KEY,
                processed_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // ── Offline queue ────────────────────────────────────────────

    /// Enqueues an event for later publish.
    ///
    /// Idempotent: returns `false` without touching the row if an entry
    /// with the same event ID already exists.
    pub fn enqueue(&self, event: &CoordinationEvent) -> StorageResult<bool> {
        let payload = serde_json::to_string(event)?;
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO offline_queue (event_id, family_id, payload, enqueued_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.id.to_string(),
                event.family_id.to_string(),
                payload,
                Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Removes an event from the queue, typically after a confirmed
    /// publish. Removing an absent ID is a no-op.
    pub fn dequeue(&self, event_id: &EventId) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM offline_queue WHERE event_id = ?1",
            params![event_id.to_string()],
        )?;
        Ok(())
    }

    /// Returns all queued events ordered by enqueue time.
    pub fn all_pending(&self) -> StorageResult<Vec<CoordinationEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT payload FROM offline_queue ORDER BY enqueued_at, rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            let payload: String = row.get(0)?;
            Ok(payload)
        })?;

        let mut events = Vec::new();
        for row in rows {
            let payload = row?;
            let event: CoordinationEvent = serde_json::from_str(&payload)
                .map_err(|e| StorageError::InvalidData(format!("queued event: {e}")))?;
            events.push(event);
        }
        Ok(events)
    }

    /// Number of events awaiting publish — the "pending sync" signal
    /// surfaced to the UI instead of raw transient errors.
    pub fn pending_count(&self) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM offline_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Removes queue entries enqueued before the cutoff.
    ///
    /// This is the documented data-loss boundary: a device that never
    /// reconnects within the retention window loses its unsent events.
    /// Returns the number of entries removed.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM offline_queue WHERE enqueued_at < ?1",
            params![cutoff.to_rfc3339_opts(SecondsFormat::Micros, true)],
        )?;
        Ok(removed)
    }

    // ── Processed-event set ──────────────────────────────────────

    /// Whether an inbound event has already been applied on this device.
    pub fn has_processed(&self, event_id: &EventId) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM processed_events WHERE event_id = ?1",
            params![event_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Records that an inbound event was applied. Idempotent.
    pub fn mark_processed(&self, event_id: &EventId) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO processed_events (event_id, processed_at) VALUES (?1, ?2)",
            params![
                event_id.to_string(),
                Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
            ],
        )?;
        Ok(())
    }

    /// Removes processed-event entries recorded before the cutoff. The set
    /// grows monotonically between prunes; pruning alongside the queue
    /// keeps it bounded. Returns the number of entries removed.
    pub fn prune_processed_older_than(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM processed_events WHERE processed_at < ?1",
            params![cutoff.to_rfc3339_opts(SecondsFormat::Micros, true)],
        )?;
        Ok(removed)
    }
}
