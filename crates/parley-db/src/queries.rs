use crate::models::{ConversationRow, MessageRow, NewUser, SessionRow, UserRow};
use crate::Database;
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (nickname, email, password, first_name, last_name, age, gender)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    user.nickname,
                    user.email,
                    user.password_hash,
                    user.first_name,
                    user.last_name,
                    user.age,
                    user.gender,
                ],
            )?;
            Ok(())
        })
    }

    /// Look a user up by nickname or email.
    pub fn get_user_by_login(&self, identifier: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_login(conn, identifier))
    }

    pub fn user_exists(&self, nickname: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE nickname = ?1",
                [nickname],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    pub fn nickname_or_email_taken(&self, nickname: &str, email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE nickname = ?1 OR email = ?2",
                (nickname, email),
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    // -- Sessions --

    pub fn insert_session(&self, session_id: &str, nickname: &str, expires_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (session_id, nickname, expires_at) VALUES (?1, ?2, ?3)",
                (session_id, nickname, expires_at),
            )?;
            Ok(())
        })
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT session_id, nickname, expires_at FROM sessions WHERE session_id = ?1",
                    [session_id],
                    |row| {
                        Ok(SessionRow {
                            session_id: row.get(0)?,
                            nickname: row.get(1)?,
                            expires_at: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Returns the number of rows removed (0 when already gone).
    pub fn delete_session(&self, session_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM sessions WHERE session_id = ?1", [session_id])?;
            Ok(n)
        })
    }

    pub fn delete_sessions_expired_at(&self, now: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", [now])?;
            Ok(n)
        })
    }

    // -- Messages --

    /// Append a message. `content` must already be escaped. Returns the row id.
    pub fn insert_message(
        &self,
        sender: &str,
        receiver: &str,
        content: &str,
        timestamp: &str,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (sender, receiver, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
                (sender, receiver, content, timestamp),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Messages exchanged between `a` and `b`, newest first.
    pub fn get_history(&self, a: &str, b: &str, limit: u32, offset: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_history(conn, a, b, limit, offset))
    }

    pub fn count_messages_between(&self, a: &str, b: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)",
                (a, b),
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// One row per peer `viewer` has exchanged messages with, ordered by the
    /// latest interaction (newest first), ties broken by peer name.
    pub fn get_conversations(&self, viewer: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| query_conversations(conn, viewer))
    }

    // -- Notifications --

    /// Upsert: creates the counter at 1 or bumps it. Returns the new count.
    pub fn increment_unread(&self, receiver: &str, sender: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "INSERT INTO notifications (receiver_nickname, sender_nickname, unread_messages)
                 VALUES (?1, ?2, 1)
                 ON CONFLICT(receiver_nickname, sender_nickname)
                 DO UPDATE SET unread_messages = unread_messages + 1
                 RETURNING unread_messages",
                (receiver, sender),
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    pub fn reset_unread(&self, receiver: &str, sender: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE notifications SET unread_messages = 0
                 WHERE receiver_nickname = ?1 AND sender_nickname = ?2",
                (receiver, sender),
            )?;
            Ok(())
        })
    }

    pub fn get_unread(&self, receiver: &str, sender: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn
                .query_row(
                    "SELECT unread_messages FROM notifications
                     WHERE receiver_nickname = ?1 AND sender_nickname = ?2",
                    (receiver, sender),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(count.unwrap_or(0))
        })
    }

    /// Non-zero counters for `receiver`, as (sender, count).
    pub fn get_unread_counts(&self, receiver: &str) -> Result<Vec<(String, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sender_nickname, unread_messages FROM notifications
                 WHERE receiver_nickname = ?1 AND unread_messages > 0
                 ORDER BY sender_nickname",
            )?;
            let rows = stmt
                .query_map([receiver], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user_by_login(conn: &Connection, identifier: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, nickname, email, password, first_name, last_name, age, gender, created_at
         FROM users
         WHERE nickname = ?1 OR email = ?1",
    )?;

    let row = stmt
        .query_row([identifier], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                nickname: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                first_name: row.get(4)?,
                last_name: row.get(5)?,
                age: row.get(6)?,
                gender: row.get(7)?,
                created_at: row.get(8)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_history(
    conn: &Connection,
    a: &str,
    b: &str,
    limit: u32,
    offset: u32,
) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender, receiver, content, timestamp
         FROM messages
         WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)
         ORDER BY id DESC
         LIMIT ?3 OFFSET ?4",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![a, b, limit, offset], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                sender: row.get(1)?,
                receiver: row.get(2)?,
                content: row.get(3)?,
                timestamp: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_conversations(conn: &Connection, viewer: &str) -> Result<Vec<ConversationRow>> {
    // Rank each peer's messages by recency and keep the newest one.
    let mut stmt = conn.prepare(
        "WITH exchanged AS (
             SELECT
                 CASE WHEN sender = ?1 THEN receiver ELSE sender END AS peer,
                 content,
                 timestamp,
                 ROW_NUMBER() OVER (
                     PARTITION BY CASE WHEN sender = ?1 THEN receiver ELSE sender END
                     ORDER BY timestamp DESC, id DESC
                 ) AS recency
             FROM messages
             WHERE sender = ?1 OR receiver = ?1
         )
         SELECT e.peer, e.content, e.timestamp, COALESCE(n.unread_messages, 0)
         FROM exchanged e
         LEFT JOIN notifications n
             ON n.receiver_nickname = ?1 AND n.sender_nickname = e.peer
         WHERE e.recency = 1 AND e.peer != ?1
         ORDER BY e.timestamp DESC, e.peer ASC",
    )?;

    let rows = stmt
        .query_map([viewer], |row| {
            Ok(ConversationRow {
                peer: row.get(0)?,
                last_content: row.get(1)?,
                last_timestamp: row.get(2)?,
                unread: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
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
