use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            nickname    TEXT NOT NULL UNIQUE,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            first_name  TEXT NOT NULL DEFAULT '',
            last_name   TEXT NOT NULL DEFAULT '',
            age         INTEGER NOT NULL DEFAULT 0,
            gender      TEXT NOT NULL DEFAULT '',
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS sessions (
            session_id  TEXT PRIMARY KEY,
            nickname    TEXT NOT NULL REFERENCES users(nickname),
            expires_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_expiry
            ON sessions(expires_at);

        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            sender      TEXT NOT NULL REFERENCES users(nickname),
            receiver    TEXT NOT NULL REFERENCES users(nickname),
            content     TEXT NOT NULL,
            timestamp   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender, receiver, id);

        CREATE INDEX IF NOT EXISTS idx_messages_receiver
            ON messages(receiver, id);

        CREATE TABLE IF NOT EXISTS notifications (
            receiver_nickname   TEXT NOT NULL REFERENCES users(nickname),
            sender_nickname     TEXT NOT NULL REFERENCES users(nickname),
            unread_messages     INTEGER NOT NULL DEFAULT 0 CHECK (unread_messages >= 0),
            PRIMARY KEY (receiver_nickname, sender_nickname)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
