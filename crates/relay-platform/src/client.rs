use async_trait::async_trait;
use relay_core::types::{PlatformId, PlatformTs};
use relay_core::Result;

use crate::types::{
    ChannelInfo, ConnectedInfo, PlatformEvent, PostMessage, UploadFile, UploadedFile, UserInfo,
};

/// The chat-platform client surface this core consumes.
///
/// This is the out-of-scope external collaborator named in spec.md §1 — a
/// real implementation would wrap a vendor SDK's realtime stream and REST
/// calls. The core only ever programs against this trait, which is why
/// sessions, the bot instance, and the command layer have no vendor SDK
/// dependency at all.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Establish the realtime connection and discover workspace/bot identity.
    async fn connect(&self) -> Result<ConnectedInfo>;

    /// Gracefully close the connection.
    async fn disconnect(&self) -> Result<()>;

    /// Take ownership of this client's realtime event receiver. Returns
    /// `None` if already taken (a client's event stream can only be
    /// consumed once) — mirrors `Option::take` semantics deliberately so a
    /// bot can assert it only calls this once, right after `connect`.
    fn take_event_receiver(&self) -> Option<tokio::sync::mpsc::Receiver<PlatformEvent>>;

    /// Post a message, optionally as a threaded reply. Returns the new
    /// message's platform timestamp.
    async fn post_message(&self, req: PostMessage) -> Result<PlatformTs>;

    /// Edit an existing message's text in place.
    async fn update_message(&self, channel_id: &str, ts: &str, text: &str) -> Result<()>;

    /// Delete a message (used by `abandon()` to remove a failed thread anchor).
    async fn delete_message(&self, channel_id: &str, ts: &str) -> Result<()>;

    async fn add_reaction(&self, channel_id: &str, ts: &str, emoji: &str) -> Result<()>;
    async fn remove_reaction(&self, channel_id: &str, ts: &str, emoji: &str) -> Result<()>;

    /// Open (or fetch the existing) DM channel for this set of user ids.
    async fn open_dm(&self, user_ids: &[PlatformId]) -> Result<PlatformId>;

    /// Download a file's bytes from a platform-hosted URL.
    async fn download_file(&self, url: &str) -> Result<Vec<u8>>;

    /// Upload bytes as a file, optionally threaded on the staff side.
    async fn upload_file(&self, req: UploadFile) -> Result<UploadedFile>;

    async fn channel_info(&self, channel_id: &str) -> Result<ChannelInfo>;
    async fn user_info(&self, user_id: &str) -> Result<UserInfo>;

    async fn invite_to_channel(&self, channel_id: &str, user_ids: &[PlatformId]) -> Result<()>;
    async fn kick_from_channel(&self, channel_id: &str, user_id: &str) -> Result<()>;

    /// Clickable permalink for a message, rendered by the caller as `<url|ts>`.
    async fn permalink(&self, channel_id: &str, ts: &str) -> Result<String>;

    async fn send_typing(&self, channel_id: &str) -> Result<()>;
}
