use std::sync::Mutex;

use chrono::Utc;
use relay_core::{RelayError, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::schema::init_db;
use crate::types::{
    HistoryPage, NewMessageLog, NewSession, StoredBot, StoredMessageLog, StoredSession,
};

fn pg_err(e: rusqlite::Error) -> RelayError {
    RelayError::Persistence(e.to_string())
}

/// Abstract persistence surface consumed by the session and bot-instance
/// layers (spec.md §4.7). Kept as a trait so the event loop and command
/// layer never depend on `rusqlite` directly.
pub trait Store: Send + Sync {
    fn upsert_bot(
        &self,
        name: &str,
        workspace_id: Option<&str>,
        session_timeout_secs: i64,
    ) -> Result<StoredBot>;

    fn add_blacklist(&self, bot_name: &str, user_id: &str) -> Result<()>;
    fn remove_blacklist(&self, bot_name: &str, user_id: &str) -> Result<()>;

    fn add_invited(&self, bot_name: &str, user_id: &str) -> Result<()>;
    fn remove_invited(&self, bot_name: &str, user_id: &str) -> Result<()>;
    fn list_invited(&self, bot_name: &str) -> Result<Vec<String>>;

    fn create_session(&self, new: NewSession) -> Result<StoredSession>;
    fn touch_session(&self, session_id: i64, active: bool) -> Result<()>;

    fn append_message_log(
        &self,
        session_id: i64,
        entry: NewMessageLog,
    ) -> Result<StoredMessageLog>;

    fn find_by_thread(&self, bot_name: &str, thread_id: &str) -> Result<Option<StoredSession>>;

    /// Most recently updated session for this participant set, regardless
    /// of active status — matches `original_source/convinit.go`'s
    /// `findPreviousConv` fallback query, which carries no active filter.
    fn find_latest_by_participants(
        &self,
        bot_name: &str,
        participants: &str,
    ) -> Result<Option<StoredSession>>;

    fn history(
        &self,
        bot_name: &str,
        participants: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<HistoryPage>;
}

/// `rusqlite`-backed implementation. Wraps a single connection in a mutex —
/// sufficient for the single-node deployment target; a connection pool would
/// be the natural next step if concurrent write load grows.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and run schema migrations.
    pub fn open(data_source: &str) -> Result<Self> {
        let conn = if data_source == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(data_source)
        }
        .map_err(pg_err)?;
        init_db(&conn).map_err(pg_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load_messages(conn: &Connection, session_id: i64) -> rusqlite::Result<Vec<StoredMessageLog>> {
        let mut stmt = conn.prepare(
            "SELECT id, session_id, author_id, text, direct_ts, conv_ts, original
             FROM message_logs WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], row_to_message)?;
        rows.collect()
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredSession> {
    Ok(StoredSession {
        id: row.get(0)?,
        bot_name: row.get(1)?,
        participants: row.get(2)?,
        dm_channel_id: row.get(3)?,
        thread_id: row.get(4)?,
        active: row.get::<_, i64>(5)? != 0,
        updated_at: row.get(6)?,
        messages: Vec::new(),
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessageLog> {
    Ok(StoredMessageLog {
        id: row.get(0)?,
        session_id: row.get(1)?,
        author_id: row.get(2)?,
        text: row.get(3)?,
        direct_ts: row.get(4)?,
        conv_ts: row.get(5)?,
        original: row.get::<_, i64>(6)? != 0,
    })
}

impl Store for SqliteStore {
    fn upsert_bot(
        &self,
        name: &str,
        workspace_id: Option<&str>,
        session_timeout_secs: i64,
    ) -> Result<StoredBot> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO bots (name, workspace_id) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET workspace_id = excluded.workspace_id",
            params![name, workspace_id],
        )
        .map_err(pg_err)?;

        let mut blacklist_stmt = conn
            .prepare("SELECT user_id FROM blacklist WHERE bot_name = ?1")
            .map_err(pg_err)?;
        let blacklist = blacklist_stmt
            .query_map(params![name], |r| r.get::<_, String>(0))
            .map_err(pg_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(pg_err)?;
        drop(blacklist_stmt);

        let cutoff = (Utc::now() - chrono::Duration::seconds(session_timeout_secs)).to_rfc3339();
        let mut sessions_stmt = conn
            .prepare(
                "SELECT id, bot_name, participants, dm_channel_id, thread_id, active, updated_at
                 FROM sessions
                 WHERE bot_name = ?1 AND updated_at > ?2
                 ORDER BY dm_channel_id ASC, updated_at DESC",
            )
            .map_err(pg_err)?;
        let mut rows = sessions_stmt
            .query_map(params![name, cutoff], row_to_session)
            .map_err(pg_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(pg_err)?;
        drop(sessions_stmt);

        // Only the newest row per dm_channel_id is promoted to active in
        // memory; the ORDER BY above already puts it first per group.
        let mut seen_dm = std::collections::HashSet::new();
        for session in rows.iter_mut() {
            let is_newest = seen_dm.insert(session.dm_channel_id.clone());
            session.active = session.active && is_newest;
            session.messages = Self::load_messages(&conn, session.id).map_err(pg_err)?;
        }

        Ok(StoredBot {
            name: name.to_string(),
            workspace_id: workspace_id.map(|s| s.to_string()),
            blacklist,
            sessions: rows,
        })
    }

    fn add_blacklist(&self, bot_name: &str, user_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO blacklist (bot_name, user_id) VALUES (?1, ?2)",
            params![bot_name, user_id],
        )
        .map_err(pg_err)?;
        Ok(())
    }

    fn remove_blacklist(&self, bot_name: &str, user_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM blacklist WHERE bot_name = ?1 AND user_id = ?2",
            params![bot_name, user_id],
        )
        .map_err(pg_err)?;
        Ok(())
    }

    fn add_invited(&self, bot_name: &str, user_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO invited (bot_name, user_id) VALUES (?1, ?2)",
            params![bot_name, user_id],
        )
        .map_err(pg_err)?;
        Ok(())
    }

    fn remove_invited(&self, bot_name: &str, user_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM invited WHERE bot_name = ?1 AND user_id = ?2",
            params![bot_name, user_id],
        )
        .map_err(pg_err)?;
        Ok(())
    }

    fn list_invited(&self, bot_name: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT user_id FROM invited WHERE bot_name = ?1 ORDER BY id ASC")
            .map_err(pg_err)?;
        let rows = stmt
            .query_map(params![bot_name], |r| r.get::<_, String>(0))
            .map_err(pg_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(pg_err)?;
        Ok(rows)
    }

    fn create_session(&self, new: NewSession) -> Result<StoredSession> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions (bot_name, participants, dm_channel_id, thread_id, active, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![new.bot_name, new.participants, new.dm_channel_id, new.thread_id, now],
        )
        .map_err(pg_err)?;
        let id = conn.last_insert_rowid();
        Ok(StoredSession {
            id,
            bot_name: new.bot_name,
            participants: new.participants,
            dm_channel_id: new.dm_channel_id,
            thread_id: new.thread_id,
            active: true,
            updated_at: now,
            messages: Vec::new(),
        })
    }

    fn touch_session(&self, session_id: i64, active: bool) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE sessions SET active = ?1, updated_at = ?2 WHERE id = ?3",
                params![active as i64, now, session_id],
            )
            .map_err(pg_err)?;
        if changed == 0 {
            return Err(RelayError::NotFound(format!("session {session_id}")));
        }
        Ok(())
    }

    fn append_message_log(
        &self,
        session_id: i64,
        entry: NewMessageLog,
    ) -> Result<StoredMessageLog> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO message_logs (session_id, author_id, text, direct_ts, conv_ts, original)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                entry.author_id,
                entry.text,
                entry.direct_ts,
                entry.conv_ts,
                entry.original as i64
            ],
        )
        .map_err(pg_err)?;
        let id = conn.last_insert_rowid();
        Ok(StoredMessageLog {
            id,
            session_id,
            author_id: entry.author_id,
            text: entry.text,
            direct_ts: entry.direct_ts,
            conv_ts: entry.conv_ts,
            original: entry.original,
        })
    }

    fn find_by_thread(&self, bot_name: &str, thread_id: &str) -> Result<Option<StoredSession>> {
        let conn = self.conn.lock().unwrap();
        let found = conn
            .query_row(
                "SELECT id, bot_name, participants, dm_channel_id, thread_id, active, updated_at
                 FROM sessions WHERE bot_name = ?1 AND thread_id = ?2",
                params![bot_name, thread_id],
                row_to_session,
            )
            .optional()
            .map_err(pg_err)?;
        match found {
            Some(mut s) => {
                s.messages = Self::load_messages(&conn, s.id).map_err(pg_err)?;
                Ok(Some(s))
            }
            None => Ok(None),
        }
    }

    fn find_latest_by_participants(
        &self,
        bot_name: &str,
        participants: &str,
    ) -> Result<Option<StoredSession>> {
        let conn = self.conn.lock().unwrap();
        let found = conn
            .query_row(
                "SELECT id, bot_name, participants, dm_channel_id, thread_id, active, updated_at
                 FROM sessions
                 WHERE bot_name = ?1 AND participants = ?2
                 ORDER BY updated_at DESC LIMIT 1",
                params![bot_name, participants],
                row_to_session,
            )
            .optional()
            .map_err(pg_err)?;
        match found {
            Some(mut s) => {
                s.messages = Self::load_messages(&conn, s.id).map_err(pg_err)?;
                Ok(Some(s))
            }
            None => Ok(None),
        }
    }

    fn history(
        &self,
        bot_name: &str,
        participants: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<HistoryPage> {
        let conn = self.conn.lock().unwrap();
        let offset = (page as i64) * (page_size as i64);
        // fetch one extra row to cheaply detect whether another page follows
        let limit = page_size as i64 + 1;

        let mut rows = match participants {
            Some(p) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, bot_name, participants, dm_channel_id, thread_id, active, updated_at
                         FROM sessions
                         WHERE bot_name = ?1 AND participants = ?2
                         ORDER BY updated_at DESC, id DESC
                         LIMIT ?3 OFFSET ?4",
                    )
                    .map_err(pg_err)?;
                stmt.query_map(params![bot_name, p, limit, offset], row_to_session)
                    .map_err(pg_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(pg_err)?
            }
            None => {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, bot_name, participants, dm_channel_id, thread_id, active, updated_at
                         FROM sessions
                         WHERE bot_name = ?1
                         ORDER BY updated_at DESC, id DESC
                         LIMIT ?2 OFFSET ?3",
                    )
                    .map_err(pg_err)?;
                stmt.query_map(params![bot_name, limit, offset], row_to_session)
                    .map_err(pg_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(pg_err)?
            }
        };

        let has_more = rows.len() as u32 > page_size;
        rows.truncate(page_size as usize);
        Ok(HistoryPage {
            sessions: rows,
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::open(":memory:").unwrap()
    }

    #[test]
    fn upsert_bot_creates_row_and_preloads_nothing_when_empty() {
        let s = store();
        let bot = s.upsert_bot("alpha", Some("T1"), 3600).unwrap();
        assert_eq!(bot.name, "alpha");
        assert!(bot.blacklist.is_empty());
        assert!(bot.sessions.is_empty());
    }

    #[test]
    fn blacklist_add_remove_roundtrips() {
        let s = store();
        s.upsert_bot("alpha", None, 3600).unwrap();
        s.add_blacklist("alpha", "U1").unwrap();
        let bot = s.upsert_bot("alpha", None, 3600).unwrap();
        assert_eq!(bot.blacklist, vec!["U1".to_string()]);

        s.remove_blacklist("alpha", "U1").unwrap();
        let bot = s.upsert_bot("alpha", None, 3600).unwrap();
        assert!(bot.blacklist.is_empty());
    }

    #[test]
    fn only_newest_session_per_dm_channel_is_active_on_preload() {
        let s = store();
        s.upsert_bot("alpha", None, 3600).unwrap();

        let first = s
            .create_session(NewSession {
                bot_name: "alpha".into(),
                participants: "U1".into(),
                dm_channel_id: "D1".into(),
                thread_id: "T1".into(),
            })
            .unwrap();
        // second session on the same DM, superseding the first (a resume)
        let second = s
            .create_session(NewSession {
                bot_name: "alpha".into(),
                participants: "U1".into(),
                dm_channel_id: "D1".into(),
                thread_id: "T2".into(),
            })
            .unwrap();
        s.touch_session(first.id, false).unwrap();

        let bot = s.upsert_bot("alpha", None, 3600).unwrap();
        let active: Vec<_> = bot.sessions.iter().filter(|sess| sess.active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
    }

    #[test]
    fn append_message_log_and_find_by_thread_roundtrips() {
        let s = store();
        s.upsert_bot("alpha", None, 3600).unwrap();
        let session = s
            .create_session(NewSession {
                bot_name: "alpha".into(),
                participants: "U1".into(),
                dm_channel_id: "D1".into(),
                thread_id: "T1".into(),
            })
            .unwrap();
        s.append_message_log(
            session.id,
            NewMessageLog {
                author_id: "U1".into(),
                text: "hi".into(),
                direct_ts: "1.1".into(),
                conv_ts: "2.1".into(),
                original: true,
            },
        )
        .unwrap();

        let found = s.find_by_thread("alpha", "T1").unwrap().unwrap();
        assert_eq!(found.messages.len(), 1);
        assert_eq!(found.messages[0].text, "hi");
    }

    #[test]
    fn history_pagination_reports_has_more() {
        let s = store();
        s.upsert_bot("alpha", None, 3600).unwrap();
        for i in 0..3 {
            s.create_session(NewSession {
                bot_name: "alpha".into(),
                participants: "U1".into(),
                dm_channel_id: format!("D{i}"),
                thread_id: format!("T{i}"),
            })
            .unwrap();
        }

        let page = s.history("alpha", Some("U1"), 0, 2).unwrap();
        assert_eq!(page.sessions.len(), 2);
        assert!(page.has_more);

        let page2 = s.history("alpha", Some("U1"), 1, 2).unwrap();
        assert_eq!(page2.sessions.len(), 1);
        assert!(!page2.has_more);
    }

    #[test]
    fn find_latest_by_participants_returns_inactive_sessions_too() {
        let s = store();
        s.upsert_bot("alpha", None, 3600).unwrap();
        let session = s
            .create_session(NewSession {
                bot_name: "alpha".into(),
                participants: "U1".into(),
                dm_channel_id: "D1".into(),
                thread_id: "T1".into(),
            })
            .unwrap();
        s.touch_session(session.id, false).unwrap();

        let found = s.find_latest_by_participants("alpha", "U1").unwrap();
        assert_eq!(found.unwrap().id, session.id);
    }

    #[test]
    fn find_latest_by_participants_prefers_most_recently_updated() {
        let s = store();
        s.upsert_bot("alpha", None, 3600).unwrap();
        let first = s
            .create_session(NewSession {
                bot_name: "alpha".into(),
                participants: "U1".into(),
                dm_channel_id: "D1".into(),
                thread_id: "T1".into(),
            })
            .unwrap();
        let second = s
            .create_session(NewSession {
                bot_name: "alpha".into(),
                participants: "U1".into(),
                dm_channel_id: "D2".into(),
                thread_id: "T2".into(),
            })
            .unwrap();
        s.touch_session(first.id, false).unwrap();
        s.touch_session(second.id, false).unwrap();

        let found = s.find_latest_by_participants("alpha", "U1").unwrap();
        assert_eq!(found.unwrap().id, second.id);
    }
}
