/// A bot row as loaded from the store at startup — spec.md §3 "Bot instance"
/// plus §4.7's preloading rule (blacklist + recent sessions attached).
#[derive(Debug, Clone)]
pub struct StoredBot {
    pub name: String,
    pub workspace_id: Option<String>,
    pub blacklist: Vec<String>,
    pub sessions: Vec<StoredSession>,
}

/// A persisted session row. `messages` is only populated when the caller
/// asks for it (`find_by_thread`/`find_by_participants`); list/history
/// queries return the row without its message log.
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub id: i64,
    pub bot_name: String,
    pub participants: String,
    pub dm_channel_id: String,
    pub thread_id: String,
    pub active: bool,
    pub updated_at: String,
    pub messages: Vec<StoredMessageLog>,
}

/// One mirrored-message record — spec.md §3 "Mirrored message".
#[derive(Debug, Clone)]
pub struct StoredMessageLog {
    pub id: i64,
    pub session_id: i64,
    pub author_id: String,
    pub text: String,
    pub direct_ts: String,
    pub conv_ts: String,
    pub original: bool,
}

/// A fresh log entry to append; `id` is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessageLog {
    pub author_id: String,
    pub text: String,
    pub direct_ts: String,
    pub conv_ts: String,
    pub original: bool,
}

/// A fresh session row to insert on creation.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub bot_name: String,
    pub participants: String,
    pub dm_channel_id: String,
    pub thread_id: String,
}

/// One page of session history, ordered `updated_at desc, id desc`.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub sessions: Vec<StoredSession>,
    pub has_more: bool,
}
