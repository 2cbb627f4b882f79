//! Coordination events — immutable records of one cross-device-visible
//! state change.
//!
//! Events are the unit of replication between a family's devices. Each
//! event carries everything a remote device needs to react to the change:
//! who acted, which record was touched, and a loose field-level diff.
//! Events are never mutated after creation; "has this device processed it"
//! status lives in the consuming device's local state, not on the event.

use crate::{DeviceId, Error, FamilyId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an event. Generated at creation, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new event ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates an event ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The kind of state change an event describes.
///
/// Closed set: adding a variant requires updating every consumer's
/// exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An app was moved to a different category.
    AppCategorizationChanged,
    /// A child's profile fields were edited.
    ChildProfileModified,
    /// A child's point balance changed.
    PointsAdjusted,
    /// A reward was redeemed against a point balance.
    RewardRedeemed,
    /// Family-level settings changed.
    SettingsUpdated,
    /// A usage session started, ended, or was corrected.
    UsageSessionChanged,
    /// A new child profile was created.
    ChildAdded,
}

impl EventKind {
    /// Change keys that must be present for this kind, validated at the
    /// construction boundary rather than deep in consumers.
    fn required_change_keys(&self) -> &'static [&'static str] {
        match self {
            EventKind::AppCategorizationChanged => &["category"],
            EventKind::PointsAdjusted => &["points"],
            EventKind::RewardRedeemed => &["reward_id"],
            EventKind::ChildAdded => &["name"],
            EventKind::ChildProfileModified
            | EventKind::SettingsUpdated
            | EventKind::UsageSessionChanged => &[],
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::AppCategorizationChanged => "app_categorization_changed",
            EventKind::ChildProfileModified => "child_profile_modified",
            EventKind::PointsAdjusted => "points_adjusted",
            EventKind::RewardRedeemed => "reward_redeemed",
            EventKind::SettingsUpdated => "settings_updated",
            EventKind::UsageSessionChanged => "usage_session_changed",
            EventKind::ChildAdded => "child_added",
        };
        write!(f, "{s}")
    }
}

/// Logical pointer to the record an event mutated.
///
/// This is a back-reference for lookup only, not an ownership reference;
/// the coordination core never dereferences it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    /// The logical record type, e.g. "child_profile" or "app_category".
    pub entity: String,
    /// The mutated record's identifier, as a string.
    pub entity_id: String,
}

impl TargetRef {
    /// Creates a target reference.
    pub fn new(entity: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            entity_id: entity_id.into(),
        }
    }
}

/// An immutable record of one state change, replicated across a family's
/// devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationEvent {
    /// Unique identifier for this event.
    pub id: EventId,

    /// The family whose state changed.
    pub family_id: FamilyId,

    /// The acting user. Used to exclude self-originated notifications.
    pub triggering_user_id: UserId,

    /// What kind of change this is.
    pub kind: EventKind,

    /// The record the change applies to.
    pub target: TargetRef,

    /// Ordered field name → string-encoded new value.
    ///
    /// Deliberately loose — not validated against a schema, so older app
    /// versions can carry fields they don't understand. Known per-kind
    /// required keys are checked by [`CoordinationEvent::validate`].
    pub changes: BTreeMap<String, String>,

    /// When this event was created. Consumers treat per-family history as
    /// approximately ordered by this, never as a strict causal order.
    pub timestamp: DateTime<Utc>,

    /// The originating device, for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
}

impl CoordinationEvent {
    /// Creates a new event with a fresh ID and the current timestamp.
    #[must_use]
    pub fn new(
        family_id: FamilyId,
        triggering_user_id: UserId,
        kind: EventKind,
        target: TargetRef,
        changes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            family_id,
            triggering_user_id,
            kind,
            target,
            changes,
            timestamp: Utc::now(),
            device_id: None,
        }
    }

    /// Creates a child-profile-modified event.
    #[must_use]
    pub fn child_profile_modified(
        family_id: FamilyId,
        triggering_user_id: UserId,
        child_id: impl Into<String>,
        changes: BTreeMap<String, String>,
    ) -> Self {
        Self::new(
            family_id,
            triggering_user_id,
            EventKind::ChildProfileModified,
            TargetRef::new("child_profile", child_id),
            changes,
        )
    }

    /// Creates a child-added event. `name` is the new child's display name.
    #[must_use]
    pub fn child_added(
        family_id: FamilyId,
        triggering_user_id: UserId,
        child_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let mut changes = BTreeMap::new();
        changes.insert("name".to_string(), name.into());
        Self::new(
            family_id,
            triggering_user_id,
            EventKind::ChildAdded,
            TargetRef::new("child_profile", child_id),
            changes,
        )
    }

    /// Creates a points-adjusted event. `points` is the new balance.
    #[must_use]
    pub fn points_adjusted(
        family_id: FamilyId,
        triggering_user_id: UserId,
        child_id: impl Into<String>,
        points: i64,
    ) -> Self {
        let mut changes = BTreeMap::new();
        changes.insert("points".to_string(), points.to_string());
        Self::new(
            family_id,
            triggering_user_id,
            EventKind::PointsAdjusted,
            TargetRef::new("child_profile", child_id),
            changes,
        )
    }

    /// Creates a reward-redeemed event.
    #[must_use]
    pub fn reward_redeemed(
        family_id: FamilyId,
        triggering_user_id: UserId,
        child_id: impl Into<String>,
        reward_id: impl Into<String>,
    ) -> Self {
        let mut changes = BTreeMap::new();
        changes.insert("reward_id".to_string(), reward_id.into());
        Self::new(
            family_id,
            triggering_user_id,
            EventKind::RewardRedeemed,
            TargetRef::new("child_profile", child_id),
            changes,
        )
    }

    /// Creates an app-categorization-changed event.
    #[must_use]
    pub fn app_categorization_changed(
        family_id: FamilyId,
        triggering_user_id: UserId,
        app_id: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        let mut changes = BTreeMap::new();
        changes.insert("category".to_string(), category.into());
        Self::new(
            family_id,
            triggering_user_id,
            EventKind::AppCategorizationChanged,
            TargetRef::new("app", app_id),
            changes,
        )
    }

    /// Creates a settings-updated event.
    #[must_use]
    pub fn settings_updated(
        family_id: FamilyId,
        triggering_user_id: UserId,
        changes: BTreeMap<String, String>,
    ) -> Self {
        Self::new(
            family_id,
            triggering_user_id,
            EventKind::SettingsUpdated,
            TargetRef::new("family_settings", family_id.to_string()),
            changes,
        )
    }

    /// Creates a usage-session-changed event.
    #[must_use]
    pub fn usage_session_changed(
        family_id: FamilyId,
        triggering_user_id: UserId,
        session_id: impl Into<String>,
        changes: BTreeMap<String, String>,
    ) -> Self {
        Self::new(
            family_id,
            triggering_user_id,
            EventKind::UsageSessionChanged,
            TargetRef::new("usage_session", session_id),
            changes,
        )
    }

    /// Attaches the originating device ID.
    #[must_use]
    pub fn with_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    /// Checks that the change map carries the keys this event kind
    /// requires. Kind-specific constructors always pass; events built
    /// directly from external input may not.
    pub fn validate(&self) -> Result<(), Error> {
        for key in self.kind.required_change_keys() {
            if !self.changes.contains_key(*key) {
                return Err(Error::MissingChangeKey {
                    kind: self.kind.to_string(),
                    key,
                });
            }
        }
        Ok(())
    }
}
