use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            username        TEXT NOT NULL,
            connection_id   TEXT NOT NULL,
            connected_at    TEXT NOT NULL
        );

        -- One live row per connection. Older stores indexed connection_id
        -- without uniqueness and may hold duplicates; keep the newest.
        DROP INDEX IF EXISTS idx_users_connection;
        DELETE FROM users WHERE rowid NOT IN (
            SELECT MAX(rowid) FROM users GROUP BY connection_id
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_users_connection_id
            ON users(connection_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            sender          TEXT NOT NULL,
            sender_id       TEXT NOT NULL,
            message         TEXT,
            file            TEXT,
            timestamp       TEXT NOT NULL,
            is_private      INTEGER NOT NULL DEFAULT 0,
            read            INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_messages_timestamp
            ON messages(timestamp);

        CREATE TABLE IF NOT EXISTS reactions (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            reaction    TEXT NOT NULL,
            count       INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (message_id, reaction)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
