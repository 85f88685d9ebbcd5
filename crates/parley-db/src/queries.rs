use crate::models::{MessageRow, ReactionRow, UserRow, format_timestamp};
use crate::Database;
use anyhow::Result;
use parley_types::models::{Message, Reactions, User};
use rusqlite::{Connection, Row};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, username, connection_id, connected_at";
const MESSAGE_COLUMNS: &str = "id, sender, sender_id, message, file, timestamp, is_private, read";

impl Database {
    // -- Users --

    /// Record the user for a connection. A connection that joins again
    /// replaces its row instead of adding a second one.
    pub fn create_user(&self, user: &User) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, connection_id, connected_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(connection_id) DO UPDATE SET
                    username = excluded.username,
                    connected_at = excluded.connected_at",
                (
                    Uuid::new_v4().to_string(),
                    &user.username,
                    user.connection_id.as_str(),
                    format_timestamp(&user.connected_at),
                ),
            )?;
            Ok(())
        })
    }

    /// Delete the user row of a connection in one statement, returning it.
    /// `None` if the connection never had a row.
    pub fn delete_user_by_connection(&self, connection_id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("DELETE FROM users WHERE connection_id = ?1 RETURNING {USER_COLUMNS}");
            conn.query_row(&sql, [connection_id], user_from_row).optional()
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users ORDER BY connected_at, rowid"
            ))?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let file = message.file.as_ref().map(serde_json::to_string).transpose()?;

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, sender, sender_id, message, file, timestamp, is_private, read)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    message.id.to_string(),
                    message.sender,
                    message.sender_id.as_str(),
                    message.message,
                    file,
                    format_timestamp(&message.timestamp),
                    message.is_private,
                    message.read,
                ],
            )?;
            for (reaction, count) in &message.reactions {
                tx.execute(
                    "INSERT INTO reactions (message_id, reaction, count) VALUES (?1, ?2, ?3)",
                    rusqlite::params![message.id.to_string(), reaction, count],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id],
                message_from_row,
            )
            .optional()
        })
    }

    /// Set `read` on a message and return its sender's connection id.
    /// `None` if no such message exists.
    pub fn mark_read(&self, id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "UPDATE messages SET read = 1 WHERE id = ?1 RETURNING sender_id",
                [id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Newest-first page of messages, public and private alike.
    pub fn get_messages_page(&self, skip: u64, limit: u64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 ORDER BY timestamp DESC, rowid DESC
                 LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![limit, skip], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_messages(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            Ok(count)
        })
    }

    // -- Reactions --

    /// Add one to `reaction` on a message and return the message's full
    /// reaction counts. The existence check and the increment share one
    /// transaction. `None` if the message does not exist.
    pub fn add_reaction(&self, message_id: &str, reaction: &str) -> Result<Option<Reactions>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let exists = tx
                .query_row("SELECT 1 FROM messages WHERE id = ?1", [message_id], |_| Ok(()))
                .optional()?
                .is_some();
            if !exists {
                return Ok(None);
            }

            tx.execute(
                "INSERT INTO reactions (message_id, reaction, count) VALUES (?1, ?2, 1)
                 ON CONFLICT(message_id, reaction) DO UPDATE SET count = count + 1",
                [message_id, reaction],
            )?;
            let reactions = query_reactions(&tx, message_id)?;
            tx.commit()?;

            Ok(Some(reactions))
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, reaction, count FROM reactions WHERE message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(message_ids), |row| {
                    Ok(ReactionRow {
                        message_id: row.get(0)?,
                        reaction: row.get(1)?,
                        count: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_reactions(conn: &Connection, message_id: &str) -> Result<Reactions> {
    let mut stmt = conn.prepare("SELECT reaction, count FROM reactions WHERE message_id = ?1")?;
    let reactions = stmt
        .query_map([message_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?
        .collect::<std::result::Result<Reactions, _>>()?;
    Ok(reactions)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        connection_id: row.get(2)?,
        connected_at: row.get(3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender: row.get(1)?,
        sender_id: row.get(2)?,
        message: row.get(3)?,
        file: row.get(4)?,
        timestamp: row.get(5)?,
        is_private: row.get(6)?,
        read: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
