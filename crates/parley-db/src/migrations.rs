use rusqlite::Connection;
use tracing::info;

use crate::StoreError;

pub fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id           INTEGER PRIMARY KEY,
            name         TEXT NOT NULL UNIQUE,
            avatar_url   TEXT,
            online       INTEGER NOT NULL DEFAULT 0,
            last_seen_at TEXT,
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_users_online
            ON users(online);

        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY,
            channel     TEXT NOT NULL,
            author      TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_created
            ON messages(created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
