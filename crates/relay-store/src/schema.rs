use rusqlite::{Connection, Result};

/// Initialise every table and index. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_bots_table(conn)?;
    create_blacklist_table(conn)?;
    create_invited_table(conn)?;
    create_sessions_table(conn)?;
    create_message_logs_table(conn)?;
    Ok(())
}

fn create_bots_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS bots (
            name         TEXT PRIMARY KEY,
            workspace_id TEXT
        );",
    )
}

fn create_blacklist_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS blacklist (
            id       INTEGER PRIMARY KEY AUTOINCREMENT,
            bot_name TEXT NOT NULL,
            user_id  TEXT NOT NULL,
            UNIQUE(bot_name, user_id)
        );
        CREATE INDEX IF NOT EXISTS idx_blacklist_bot
            ON blacklist(bot_name);",
    )
}

fn create_invited_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS invited (
            id       INTEGER PRIMARY KEY AUTOINCREMENT,
            bot_name TEXT NOT NULL,
            user_id  TEXT NOT NULL,
            UNIQUE(bot_name, user_id)
        );
        CREATE INDEX IF NOT EXISTS idx_invited_bot
            ON invited(bot_name);",
    )
}

fn create_sessions_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            bot_name      TEXT NOT NULL,
            participants  TEXT NOT NULL,
            dm_channel_id TEXT NOT NULL,
            thread_id     TEXT NOT NULL,
            active        INTEGER NOT NULL DEFAULT 1,
            updated_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_bot_dm
            ON sessions(bot_name, dm_channel_id, updated_at DESC);
        CREATE INDEX IF NOT EXISTS idx_sessions_bot_thread
            ON sessions(bot_name, thread_id);
        CREATE INDEX IF NOT EXISTS idx_sessions_bot_participants
            ON sessions(bot_name, participants, updated_at DESC);",
    )
}

fn create_message_logs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS message_logs (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            author_id  TEXT NOT NULL,
            text       TEXT NOT NULL,
            direct_ts  TEXT NOT NULL,
            conv_ts    TEXT NOT NULL,
            original   INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(session_id) REFERENCES sessions(id)
        );
        CREATE INDEX IF NOT EXISTS idx_message_logs_session
            ON message_logs(session_id);",
    )
}
