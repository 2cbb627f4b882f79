//! Core type definitions for KinSync.
//!
//! This crate defines the fundamental types shared by every device in a
//! family's coordination network:
//! - Family, user, and device identifiers (UUID v7)
//! - Coordination events (immutable records of one state change)
//! - The family membership record and role resolution
//!
//! Feature-specific models (child profiles, reward catalogs, screen-time
//! rules, etc.) belong to their respective apps, not here. The coordination
//! core only understands events about them.

mod event;
mod family;
mod ids;

pub use event::{CoordinationEvent, EventId, EventKind, TargetRef};
pub use family::{Family, Role, MAX_PARENTS};
pub use ids::{DeviceId, FamilyId, UserId};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("event of kind {kind} is missing required change key `{key}`")]
    MissingChangeKey { kind: String, key: &'static str },

    #[error("family already has the maximum of {0} parents")]
    FamilyFull(usize),

    #[error("the owner cannot be added as a co-parent")]
    OwnerCannotBeShared,
}
