//! Error types for the coordination engine.
//!
//! Errors fall into three classes the retry and queueing logic cares
//! about:
//!
//! - **terminal caller errors** (authorization, malformed events) — surface
//!   synchronously, never retried, never queued
//! - **transient remote errors** — retried with backoff, then absorbed into
//!   the offline queue; the UI sees queue depth, not an acute failure
//! - **permanent remote errors** — will never succeed; logged and the event
//!   is dropped from the queue

use kinsync_types::{FamilyId, UserId};
use thiserror::Error;

/// Result type for coordination operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in coordination operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The acting user may not perform this action in this family.
    #[error("user {user} is not authorized to {action}")]
    NotAuthorized { user: UserId, action: String },

    /// The family record does not exist.
    #[error("family not found: {0}")]
    FamilyNotFound(FamilyId),

    /// Transient network failure.
    #[error("network error: {0}")]
    Network(String),

    /// The remote store asked us to slow down.
    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The remote store is temporarily unavailable (5xx-class).
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    /// The remote store rejected the event as malformed. Permanent.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// The family's remote quota is exhausted. Permanent.
    #[error("remote storage quota exceeded")]
    QuotaExceeded,

    /// Local storage failure. Fatal to the affected operation.
    #[error("storage error: {0}")]
    Storage(#[from] kinsync_storage::StorageError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A channel the engine depends on was closed.
    #[error("channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// Whether a failed attempt is worth retrying.
    ///
    /// Only the transient remote class qualifies; everything else
    /// short-circuits the retry loop immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_) | SyncError::RateLimited { .. } | SyncError::Unavailable(_)
        )
    }

    /// Whether a queued event carrying this error will never succeed and
    /// should be dropped rather than retried on the next drain.
    pub fn is_permanent(&self) -> bool {
        matches!(self, SyncError::MalformedEvent(_) | SyncError::QuotaExceeded)
    }

    /// The server-requested delay, if this is a rate-limit error.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            SyncError::RateLimited { retry_after_secs } => {
                Some(std::time::Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}
