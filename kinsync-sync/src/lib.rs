//! Cross-device coordination engine for KinSync.
//!
//! Lets co-parents on different devices cooperatively edit shared family
//! state while each device may be briefly offline, with every device
//! eventually converging on the same view of what changed, by whom, and
//! when — without duplicate or lost updates.
//!
//! # Components
//!
//! - **Permission gate**: resolves a user's family role and authorizes an
//!   action before any mutation
//! - **Remote store interface**: the append-only per-family event log the
//!   devices converge on
//! - **Retry manager**: bounded exponential backoff with jitter
//! - **Connectivity observer**: edge-triggered reconnect signaling
//! - **Synchronization manager**: queue draining, idempotent inbound
//!   intake, delta fetch, periodic maintenance
//! - **Performance layer**: debouncing and bounded batch processing
//! - **Coordination facade**: the single entry point everything else calls
//!
//! # Consistency model
//!
//! Deliberately weak: per-family history is approximately ordered by event
//! timestamp, not causally ordered across devices. Concurrent offline
//! edits may arrive in either order; conflicting field writes resolve
//! last-write-wins by timestamp at intake. Delivery is at-least-once with
//! idempotent processing, so observers still see each event exactly once.
//!
//! # Example
//!
//! ```no_run
//! use kinsync_storage::OfflineQueue;
//! use kinsync_sync::{
//!     mock_store::MockStore, CoordinationFacade, PermissionGate, SyncConfig, SyncManager,
//! };
//! use kinsync_sync::permission::mock::InMemoryDirectory;
//! use kinsync_types::{DeviceId, UserId};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let user = UserId::new();
//! let queue = Arc::new(OfflineQueue::open_in_memory()?);
//! let store = Arc::new(MockStore::new());
//! let manager = Arc::new(SyncManager::new(
//!     user,
//!     DeviceId::new(),
//!     queue,
//!     store,
//!     SyncConfig::default(),
//! ));
//! let gate = PermissionGate::new(Arc::new(InMemoryDirectory::new()));
//! let facade = CoordinationFacade::new(gate, manager);
//! # Ok(())
//! # }
//! ```

pub mod connectivity;
mod error;
mod facade;
mod manager;
pub mod perf;
pub mod permission;
mod retry;
pub mod store;

pub use connectivity::{channel as connectivity_channel, ConnectivityHandle, ConnectivityObserver};
pub use error::{SyncError, SyncResult};
pub use facade::{CoordinationFacade, EventSubscription};
pub use manager::{SyncConfig, SyncManager};
pub use perf::{process_batch, Debouncer};
pub use permission::{Action, FamilyDirectory, PermissionGate};
pub use retry::{retry, RetryPolicy};
pub use store::{CoordinationStore, EventNotice};

/// Re-export of the mock store for tests and examples.
pub use store::mock as mock_store;
