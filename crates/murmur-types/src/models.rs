use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Online,
    Offline,
}

/// A user as the client knows them.
///
/// Every field except `id` may be missing: presence can report a user before
/// their record arrives, and a record can arrive before any presence sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: Option<String>,
    /// `None` until the first presence sync mentions this user.
    pub status: Option<UserStatus>,
    #[serde(default)]
    pub is_typing: bool,
}

impl User {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            username: None,
            status: None,
            is_typing: false,
        }
    }

    /// Apply a partial update. Fields absent from the patch are left untouched.
    pub fn merge(&mut self, patch: UserPatch) {
        if let Some(username) = patch.username {
            self.username = Some(username);
        }
        if let Some(status) = patch.status {
            self.status = Some(status);
        }
        if let Some(is_typing) = patch.is_typing {
            self.is_typing = is_typing;
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == Some(UserStatus::Online)
    }
}

/// Partial user update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UserStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_typing: Option<bool>,
}

impl UserPatch {
    pub fn username(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::default()
        }
    }

    pub fn status(status: UserStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn typing(is_typing: bool) -> Self {
        Self {
            is_typing: Some(is_typing),
            ..Self::default()
        }
    }

    /// Leave handling: offline, and no longer typing.
    pub fn went_offline() -> Self {
        Self {
            status: Some(UserStatus::Offline),
            is_typing: Some(false),
            ..Self::default()
        }
    }
}

/// The persisted projection of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
}

impl From<&UserRecord> for UserPatch {
    fn from(record: &UserRecord) -> Self {
        UserPatch::username(record.username.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub slug: String,
    pub created_by: Option<Uuid>,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub inserted_at: DateTime<Utc>,
}

/// A history row joined with its author, as returned by a message fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageWithAuthor {
    pub message: Message,
    pub author: Option<UserRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChannel {
    pub slug: String,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_fields_missing_from_patch() {
        let mut user = User::new(Uuid::new_v4());
        user.merge(UserPatch::username("alice"));
        user.merge(UserPatch::status(UserStatus::Online));

        assert_eq!(user.username.as_deref(), Some("alice"));
        assert_eq!(user.status, Some(UserStatus::Online));
        assert!(!user.is_typing);
    }

    #[test]
    fn went_offline_clears_typing() {
        let mut user = User::new(Uuid::new_v4());
        user.merge(UserPatch::typing(true));
        user.merge(UserPatch::went_offline());

        assert_eq!(user.status, Some(UserStatus::Offline));
        assert!(!user.is_typing);
    }

    #[test]
    fn status_uses_upper_case_on_the_wire() {
        let json = serde_json::to_string(&UserPatch::status(UserStatus::Online)).unwrap();
        assert_eq!(json, r#"{"status":"ONLINE"}"#);
    }
}
