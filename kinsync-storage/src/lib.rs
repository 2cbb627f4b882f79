//! SQLite-backed local storage for the KinSync coordination engine.
//!
//! Holds the two pieces of durable per-device state the sync layer needs:
//!
//! - the **offline queue** — events created on this device that have not
//!   yet been confirmed published to the remote store
//! - the **processed-event set** — IDs of inbound events already applied,
//!   making at-least-once redelivery idempotent
//!
//! Both live in one SQLite file. Every mutation hits the database before
//! the call returns, so a process crash loses at most the in-flight call.

mod error;
mod queue;

pub use error::{StorageError, StorageResult};
pub use queue::OfflineQueue;
