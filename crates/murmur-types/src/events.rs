use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Channel, Message, UserRecord};

/// Channel event carrying a full presence roster.
pub const PRESENCE_STATE_EVENT: &str = "presence_state";
/// Channel event carrying presence joins and leaves.
pub const PRESENCE_DIFF_EVENT: &str = "presence_diff";
/// Ephemeral typing broadcast on a conversation's typing channel.
pub const TYPING_EVENT: &str = "typing";

/// A user started or stopped typing in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingEvent {
    pub user_id: Uuid,
    pub is_typing: bool,
}

/// One live connection of a tracked identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMeta {
    /// Unique per tracked connection; leaves are matched on it.
    pub phx_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    #[serde(default)]
    pub metas: Vec<PresenceMeta>,
}

/// Presence key -> connections currently tracked under it.
pub type PresenceState = BTreeMap<String, PresenceEntry>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceDiff {
    #[serde(default)]
    pub joins: PresenceState,
    #[serde(default)]
    pub leaves: PresenceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// A persisted record, tagged by collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Record {
    User(UserRecord),
    Channel(Channel),
    Message(Message),
}

/// Insert/update notification from a record change stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub record: Record,
}

impl ChangeEvent {
    pub fn insert(record: Record) -> Self {
        Self {
            kind: ChangeKind::Insert,
            record,
        }
    }

    pub fn update(record: Record) -> Self {
        Self {
            kind: ChangeKind::Update,
            record,
        }
    }
}
