use relay_core::types::{PlatformId, PlatformTs};
use serde::{Deserialize, Serialize};

/// Information discovered when the realtime connection is established
/// (spec.md §3: "workspace/team identity ... discovered from platform on connect").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedInfo {
    pub workspace_id: PlatformId,
    pub bot_user_id: PlatformId,
}

/// A message observed on either side (DM or staff-channel thread).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub channel_id: PlatformId,
    pub user_id: PlatformId,
    pub text: String,
    pub ts: PlatformTs,
    /// Set when this message is a threaded reply; the parent message's ts.
    pub thread_ts: Option<PlatformTs>,
    pub is_dm: bool,
    pub is_group_dm: bool,
    pub files: Vec<FileRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEditedEvent {
    pub channel_id: PlatformId,
    pub user_id: PlatformId,
    pub ts: PlatformTs,
    pub new_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionEvent {
    pub channel_id: PlatformId,
    pub user_id: PlatformId,
    pub ts: PlatformTs,
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberEvent {
    pub channel_id: PlatformId,
    pub user_id: PlatformId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    pub name: String,
    pub title: String,
    pub mimetype: String,
    pub size: u64,
    pub url_private: String,
}

/// Every event variant the realtime stream (or the reaper/cross-bot
/// producers) can inject into a bot's event loop — spec.md §4.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlatformEvent {
    Connected(ConnectedInfo),
    Disconnected { intentional: bool },
    InvalidAuth,
    RateLimited { retry_after_secs: u64 },
    Message(MessageEvent),
    MessageEdited(MessageEditedEvent),
    ReactionAdded(ReactionEvent),
    ReactionRemoved(ReactionEvent),
    ChannelJoined { channel_id: PlatformId },
    GroupJoined { channel_id: PlatformId },
    MemberJoinedChannel(MemberEvent),
    MemberLeftChannel(MemberEvent),
    UserTyping(MemberEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessage {
    pub channel_id: PlatformId,
    pub thread_ts: Option<PlatformTs>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFile {
    pub channel_id: PlatformId,
    pub thread_ts: Option<PlatformTs>,
    pub filename: String,
    pub title: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub url: String,
    pub ts: PlatformTs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: PlatformId,
    pub name: String,
    pub members: Vec<PlatformId>,
    pub is_im: bool,
    pub is_mpim: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: PlatformId,
    pub name: String,
    pub is_admin: bool,
    pub is_bot: bool,
}
