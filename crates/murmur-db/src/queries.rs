use crate::Database;
use crate::models::{ChannelRow, MessageRow, UserRow, now};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str) -> Result<UserRow> {
        self.with_conn(|conn| {
            let created_at = now();
            conn.execute(
                "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
                (id, username, &created_at),
            )?;
            Ok(UserRow {
                id: id.to_string(),
                username: username.to_string(),
                created_at,
            })
        })
    }

    pub fn rename_user(&self, id: &str, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let changed = conn.execute("UPDATE users SET username = ?2 WHERE id = ?1", (id, username))?;
            if changed == 0 {
                return Ok(None);
            }
            query_user(conn, "id", id)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, username, created_at FROM users")?;
            let rows = stmt
                .query_map([], user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Channels --

    pub fn insert_channel(&self, id: &str, slug: &str, created_by: Option<&str>) -> Result<ChannelRow> {
        self.with_conn(|conn| {
            let created_at = now();
            conn.execute(
                "INSERT INTO channels (id, slug, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, slug, created_by, &created_at],
            )?;
            Ok(ChannelRow {
                id: id.to_string(),
                slug: slug.to_string(),
                created_by: created_by.map(str::to_string),
                created_at,
            })
        })
    }

    pub fn list_channels(&self) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, slug, created_by, created_at FROM channels")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ChannelRow {
                        id: row.get(0)?,
                        slug: row.get(1)?,
                        created_by: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        channel_id: &str,
        author_id: &str,
        body: &str,
    ) -> Result<MessageRow> {
        self.with_conn(|conn| {
            let created_at = now();
            conn.execute(
                "INSERT INTO messages (id, channel_id, author_id, body, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, channel_id, author_id, body, &created_at],
            )?;
            Ok(MessageRow {
                id: id.to_string(),
                channel_id: channel_id.to_string(),
                author_id: author_id.to_string(),
                author_username: None,
                body: body.to_string(),
                created_at,
            })
        })
    }

    /// The newest `limit` messages of a channel, oldest first.
    pub fn get_messages(&self, channel_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, channel_id, limit))
    }
}

fn user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT id, username, created_at FROM users WHERE {} = ?1", column);
    let row = conn.query_row(&sql, [value], user_row).optional()?;
    Ok(row)
}

fn query_messages(conn: &Connection, channel_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
    // JOIN users to fetch author_username in a single query
    let mut stmt = conn.prepare(
        "SELECT * FROM (
             SELECT m.id, m.channel_id, m.author_id, u.username, m.body, m.created_at, m.rowid AS seq
             FROM messages m
             LEFT JOIN users u ON m.author_id = u.id
             WHERE m.channel_id = ?1
             ORDER BY m.created_at DESC, m.rowid DESC
             LIMIT ?2
         )
         ORDER BY created_at ASC, seq ASC",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![channel_id, limit], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                channel_id: row.get(1)?,
                author_id: row.get(2)?,
                author_username: row.get(3)?,
                body: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}
