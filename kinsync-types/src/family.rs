//! The family membership record and role resolution.
//!
//! A family has exactly one owner and a bounded set of co-parents. Role
//! resolution is backward compatible with records written before explicit
//! roles existed: a user present in the shared list without an entry in
//! `user_roles` defaults to co-parent.

use crate::{Error, FamilyId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Product rule: at most this many parents per family, owner included.
pub const MAX_PARENTS: usize = 2;

/// A user's role within a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The family creator. Exactly one per family; cannot be reassigned
    /// or removed.
    Owner,
    /// An invited co-parent.
    CoParent,
}

impl Role {
    /// Whether this role may edit and delete shared records.
    ///
    /// Both roles currently qualify; the distinction is a placeholder for
    /// future tiering.
    #[must_use]
    pub fn has_full_access(&self) -> bool {
        matches!(self, Role::Owner | Role::CoParent)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Owner => write!(f, "owner"),
            Role::CoParent => write!(f, "co_parent"),
        }
    }
}

/// The shared-family record: who owns it and who it is shared with.
///
/// Invariant: `owner_user_id` never appears in `shared_with_user_ids`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Family {
    /// Unique identifier.
    pub id: FamilyId,
    /// The owning user. Exactly one, immutable.
    pub owner_user_id: UserId,
    /// Users the family is shared with, in invite order.
    pub shared_with_user_ids: Vec<UserId>,
    /// Explicit role assignments. Users in the shared list without an
    /// entry here default to co-parent.
    #[serde(default)]
    pub user_roles: HashMap<UserId, Role>,
}

impl Family {
    /// Creates a new family owned by `owner_user_id`.
    #[must_use]
    pub fn new(id: FamilyId, owner_user_id: UserId) -> Self {
        Self {
            id,
            owner_user_id,
            shared_with_user_ids: Vec::new(),
            user_roles: HashMap::new(),
        }
    }

    /// Total number of parents (owner plus shared users).
    #[must_use]
    pub fn parent_count(&self) -> usize {
        1 + self.shared_with_user_ids.len()
    }

    /// Shares the family with another parent as a co-parent.
    ///
    /// Idempotent for a user already in the shared list. Fails if the user
    /// is the owner or the family is at the parent cap.
    pub fn share_with(&mut self, user_id: UserId) -> Result<(), Error> {
        if user_id == self.owner_user_id {
            return Err(Error::OwnerCannotBeShared);
        }
        if self.shared_with_user_ids.contains(&user_id) {
            return Ok(());
        }
        if self.parent_count() >= MAX_PARENTS {
            return Err(Error::FamilyFull(MAX_PARENTS));
        }
        self.shared_with_user_ids.push(user_id);
        self.user_roles.insert(user_id, Role::CoParent);
        Ok(())
    }

    /// Removes a shared user. The owner cannot be removed; removing a user
    /// not in the family is a no-op.
    pub fn unshare(&mut self, user_id: &UserId) {
        self.shared_with_user_ids.retain(|u| u != user_id);
        self.user_roles.remove(user_id);
    }

    /// Resolves a user's role in this family.
    ///
    /// Resolution order: owner match, explicit role entry, then membership
    /// in the shared list (defaulting to co-parent). Returns `None` for a
    /// user with no relationship to the family.
    #[must_use]
    pub fn role_of(&self, user_id: &UserId) -> Option<Role> {
        if *user_id == self.owner_user_id {
            return Some(Role::Owner);
        }
        if let Some(role) = self.user_roles.get(user_id) {
            return Some(*role);
        }
        if self.shared_with_user_ids.contains(user_id) {
            return Some(Role::CoParent);
        }
        None
    }

    /// Whether the user has any role in the family.
    #[must_use]
    pub fn is_member(&self, user_id: &UserId) -> bool {
        self.role_of(user_id).is_some()
    }
}
