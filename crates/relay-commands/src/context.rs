use async_trait::async_trait;
use relay_core::lang::LangTable;
use relay_core::Result;
use relay_platform::UserInfo;
use relay_store::HistoryPage;

/// Summary of a tracked session, as shown by `!active`.
#[derive(Debug, Clone)]
pub struct ActiveSessionSummary {
    pub participants: Vec<String>,
    pub thread_id: String,
    pub dm_channel_id: String,
    pub updated_at: String,
}

/// Everything a command handler needs from the owning bot instance (C3).
///
/// This is the seam between the generic dispatch mechanism (C5, this crate)
/// and the per-tenant state it mutates — `relay-bot`'s `BotInstance` is the
/// only implementer, but keeping it a trait means the handlers here never
/// depend on `relay-bot` (which depends on this crate, not the reverse).
#[async_trait]
pub trait CommandContext: Send {
    fn bot_name(&self) -> &str;
    fn self_user_id(&self) -> &str;
    fn workspace_id(&self) -> Option<&str>;
    fn staff_channel_id(&self) -> &str;
    fn lang(&self) -> &LangTable;
    fn threads_per_page(&self) -> u32;

    fn has_member(&self, user_id: &str) -> bool;
    fn is_blacklisted(&self, user_id: &str) -> bool;
    fn blacklist(&self) -> Vec<String>;
    fn active_sessions(&self) -> Vec<ActiveSessionSummary>;

    async fn user_info(&self, user_id: &str) -> Result<UserInfo>;

    async fn add_blacklist(&mut self, user_id: &str) -> Result<()>;
    async fn remove_blacklist(&mut self, user_id: &str) -> Result<()>;

    async fn invite(&mut self, user_ids: &[String]) -> Result<()>;

    /// Expire the active session matching either a participant set or a
    /// thread timestamp. Returns `false` if nothing matched.
    async fn close_matching(&mut self, mention_ids: &[String], thread_ts: Option<&str>) -> Result<bool>;

    /// `!contact`: open/reuse the DM for these participants and start (or
    /// fork a new thread onto) a session with them.
    async fn contact(&mut self, participant_ids: &[String]) -> Result<()>;

    /// `!resume`: find the most recent matching session (by participants or
    /// by thread timestamp) and resume it into a fresh thread. Returns
    /// `false` if nothing matched.
    async fn resume(&mut self, mention_ids: &[String], thread_ts: Option<&str>) -> Result<bool>;

    fn history_page(&self, participants: Option<&str>, page: u32) -> Result<HistoryPage>;

    /// Rendered, ready-to-post text log for `!logs`, or `None` if nothing matched.
    fn logs_for(&self, mention_ids: &[String], thread_ts: Option<&str>, merged: bool) -> Option<String>;

    async fn post_reply(&self, channel_id: &str, thread_ts: Option<&str>, text: &str) -> Result<()>;
}

/// Everything a supervisor-scoped command (`load`/`unload`/`reload`/`uptime`)
/// needs from the process-wide registry (C6).
#[async_trait]
pub trait SupervisorContext: Send + Sync {
    async fn load(&self, name: &str) -> Result<()>;
    async fn unload(&self, name: &str) -> Result<()>;
    async fn reload(&self, name: &str) -> Result<()>;

    /// `(bot name, workspace id if same workspace as caller, seconds online)`.
    /// A `None` workspace means "different workspace" and is rendered
    /// without a user mention per spec.md's uptime command.
    fn uptimes(&self, caller_workspace: Option<&str>) -> Vec<(String, Option<String>, u64)>;
}
