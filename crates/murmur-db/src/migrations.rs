use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Id of the channel every database starts with.
pub const GENERAL_CHANNEL_ID: &str = "00000000-0000-0000-0000-000000000001";

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS channels (
            id          TEXT PRIMARY KEY,
            slug        TEXT NOT NULL UNIQUE,
            created_by  TEXT REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            channel_id  TEXT NOT NULL REFERENCES channels(id),
            author_id   TEXT NOT NULL REFERENCES users(id),
            body        TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, created_at);
        ",
    )?;

    // Seed the default general channel
    conn.execute(
        "INSERT OR IGNORE INTO channels (id, slug) VALUES (?1, 'general')",
        [GENERAL_CHANNEL_ID],
    )?;

    info!("Database migrations complete");
    Ok(())
}
