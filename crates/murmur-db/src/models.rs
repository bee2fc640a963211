//! Database row types: these map directly to SQLite rows.
//! Distinct from murmur-types models to keep the DB layer independent.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use murmur_types::models::{Channel, Message, MessageWithAuthor, UserRecord};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub created_at: String,
}

pub struct ChannelRow {
    pub id: String,
    pub slug: String,
    pub created_by: Option<String>,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    /// From the joined users row; `None` if the author is gone.
    pub author_username: Option<String>,
    pub body: String,
    pub created_at: String,
}

fn parse_id(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("bad id in database: {}", value))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("bad timestamp in database: {}", value))?
        .with_timezone(&Utc))
}

impl TryFrom<UserRow> for UserRecord {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            username: row.username,
        })
    }
}

impl TryFrom<ChannelRow> for Channel {
    type Error = anyhow::Error;

    fn try_from(row: ChannelRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            slug: row.slug,
            created_by: row.created_by.as_deref().map(parse_id).transpose()?,
            inserted_at: parse_time(&row.created_at)?,
        })
    }
}

impl TryFrom<MessageRow> for MessageWithAuthor {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        let author_id = parse_id(&row.author_id)?;
        Ok(Self {
            message: Message {
                id: parse_id(&row.id)?,
                channel_id: parse_id(&row.channel_id)?,
                author_id,
                body: row.body,
                inserted_at: parse_time(&row.created_at)?,
            },
            author: row.author_username.map(|username| UserRecord {
                id: author_id,
                username,
            }),
        })
    }
}

/// Current time in the format the schema defaults use.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_default_timestamps_parse() {
        assert!(parse_time("2024-05-01T09:30:00.125Z").is_ok());
        assert!(parse_time(&now()).is_ok());
        assert!(parse_time("2024-05-01 09:30:00").is_err());
    }

    #[test]
    fn message_row_without_author_username() {
        let author = Uuid::new_v4();
        let row = MessageRow {
            id: Uuid::new_v4().to_string(),
            channel_id: Uuid::new_v4().to_string(),
            author_id: author.to_string(),
            author_username: None,
            body: "hi".into(),
            created_at: now(),
        };

        let converted = MessageWithAuthor::try_from(row).unwrap();
        assert_eq!(converted.message.author_id, author);
        assert!(converted.author.is_none());
    }
}
