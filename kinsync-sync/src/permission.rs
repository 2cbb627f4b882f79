//! The permission gate — resolves a user's role in a family and
//! authorizes an action before any mutation is attempted.
//!
//! Denials are terminal: they surface synchronously, are never retried,
//! and the caller must not attempt the mutation.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use kinsync_types::{Family, FamilyId, Role, UserId};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// An action a user may attempt against shared family state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Read shared records.
    View,
    /// Modify shared records.
    Edit,
    /// Delete shared records.
    Delete,
    /// Invite another parent.
    Invite,
    /// Remove a parent from the family.
    Remove,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::View => write!(f, "view"),
            Action::Edit => write!(f, "edit"),
            Action::Delete => write!(f, "delete"),
            Action::Invite => write!(f, "invite"),
            Action::Remove => write!(f, "remove"),
        }
    }
}

/// Read access to family membership records.
///
/// The backing store is an external collaborator; the gate only needs
/// lookups by ID.
#[async_trait]
pub trait FamilyDirectory: Send + Sync {
    /// Fetches a family record, or `None` if it does not exist.
    async fn fetch_family(&self, id: &FamilyId) -> SyncResult<Option<Family>>;
}

/// Authorizes actions against a family before any mutation happens.
pub struct PermissionGate {
    directory: Arc<dyn FamilyDirectory>,
}

impl PermissionGate {
    /// Creates a gate backed by the given directory.
    pub fn new(directory: Arc<dyn FamilyDirectory>) -> Self {
        Self { directory }
    }

    /// Checks that `user_id` may perform `action` in `family_id`.
    ///
    /// The matrix: `View` for any role; `Edit`/`Delete` for roles with
    /// full access (currently both); `Invite`/`Remove` for the owner only.
    /// A user with no role in the family may do nothing.
    pub async fn authorize(
        &self,
        user_id: &UserId,
        family_id: &FamilyId,
        action: Action,
    ) -> SyncResult<()> {
        let family = self
            .directory
            .fetch_family(family_id)
            .await?
            .ok_or(SyncError::FamilyNotFound(*family_id))?;

        let denied = || SyncError::NotAuthorized {
            user: *user_id,
            action: action.to_string(),
        };

        let Some(role) = family.role_of(user_id) else {
            return Err(denied());
        };

        let allowed = match action {
            Action::View => true,
            Action::Edit | Action::Delete => role.has_full_access(),
            Action::Invite | Action::Remove => role == Role::Owner,
        };

        if allowed {
            debug!(%user_id, %family_id, %action, %role, "authorized");
            Ok(())
        } else {
            Err(denied())
        }
    }
}

/// An in-memory directory for tests and single-process setups.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A `FamilyDirectory` backed by a map.
    #[derive(Default)]
    pub struct InMemoryDirectory {
        families: Mutex<HashMap<FamilyId, Family>>,
    }

    impl InMemoryDirectory {
        /// Creates an empty directory.
        pub fn new() -> Self {
            Self::default()
        }

        /// Inserts or replaces a family record.
        pub fn insert(&self, family: Family) {
            self.families.lock().unwrap().insert(family.id, family);
        }
    }

    #[async_trait]
    impl FamilyDirectory for InMemoryDirectory {
        async fn fetch_family(&self, id: &FamilyId) -> SyncResult<Option<Family>> {
            Ok(self.families.lock().unwrap().get(id).cloned())
        }
    }
}
