use std::sync::Arc;

use async_trait::async_trait;
use relay_core::types::{PlatformId, PlatformTs};
use relay_core::{RelayError, Result};
use relay_platform::{
    ChannelInfo, ConnectedInfo, PlatformClient, PlatformEvent, PostMessage, UploadFile,
    UploadedFile, UserInfo,
};
use tokio::time::{sleep, Duration};
use tracing::warn;

const POST_MESSAGE_ATTEMPTS: u32 = 5;
const POST_MESSAGE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Wraps any [`PlatformClient`] to apply the single central outbound retry
/// policy of spec.md §4.3.9 / §9: up to five attempts, a fixed 2 s pause
/// between them, only for `post_message`. Grounded on
/// `skynet-channels::manager::connect_with_backoff`'s retry-loop shape, but
/// intentionally fixed-interval rather than exponential — the spec is
/// explicit that this one outbound edge uses a flat policy (exponential
/// backoff is reused as-is for the mock platform's own reconnect path
/// instead, see C6).
///
/// Every other method passes straight through. Because `relay-session` and
/// `relay-commands` only ever see a `&dyn PlatformClient`, wrapping the
/// concrete client once here gives every post — mirror, initiator notice, or
/// command reply — the retry policy for free.
pub struct RetryingPlatform {
    inner: Arc<dyn PlatformClient>,
}

impl RetryingPlatform {
    pub fn new(inner: Arc<dyn PlatformClient>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl PlatformClient for RetryingPlatform {
    async fn connect(&self) -> Result<ConnectedInfo> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await
    }

    fn take_event_receiver(&self) -> Option<tokio::sync::mpsc::Receiver<PlatformEvent>> {
        self.inner.take_event_receiver()
    }

    async fn post_message(&self, req: PostMessage) -> Result<PlatformTs> {
        let mut last_err = RelayError::Transport("post_message never attempted".to_string());
        for attempt in 1..=POST_MESSAGE_ATTEMPTS {
            match self.inner.post_message(req.clone()).await {
                Ok(ts) => return Ok(ts),
                Err(e @ RelayError::Transport(_)) => {
                    last_err = e;
                    if attempt < POST_MESSAGE_ATTEMPTS {
                        warn!(attempt, error = %last_err, "post_message failed, retrying");
                        sleep(POST_MESSAGE_RETRY_DELAY).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn update_message(&self, channel_id: &str, ts: &str, text: &str) -> Result<()> {
        self.inner.update_message(channel_id, ts, text).await
    }

    async fn delete_message(&self, channel_id: &str, ts: &str) -> Result<()> {
        self.inner.delete_message(channel_id, ts).await
    }

    async fn add_reaction(&self, channel_id: &str, ts: &str, emoji: &str) -> Result<()> {
        self.inner.add_reaction(channel_id, ts, emoji).await
    }

    async fn remove_reaction(&self, channel_id: &str, ts: &str, emoji: &str) -> Result<()> {
        self.inner.remove_reaction(channel_id, ts, emoji).await
    }

    async fn open_dm(&self, user_ids: &[PlatformId]) -> Result<PlatformId> {
        self.inner.open_dm(user_ids).await
    }

    async fn download_file(&self, url: &str) -> Result<Vec<u8>> {
        self.inner.download_file(url).await
    }

    async fn upload_file(&self, req: UploadFile) -> Result<UploadedFile> {
        self.inner.upload_file(req).await
    }

    async fn channel_info(&self, channel_id: &str) -> Result<ChannelInfo> {
        self.inner.channel_info(channel_id).await
    }

    async fn user_info(&self, user_id: &str) -> Result<UserInfo> {
        self.inner.user_info(user_id).await
    }

    async fn invite_to_channel(&self, channel_id: &str, user_ids: &[PlatformId]) -> Result<()> {
        self.inner.invite_to_channel(channel_id, user_ids).await
    }

    async fn kick_from_channel(&self, channel_id: &str, user_id: &str) -> Result<()> {
        self.inner.kick_from_channel(channel_id, user_id).await
    }

    async fn permalink(&self, channel_id: &str, ts: &str) -> Result<String> {
        self.inner.permalink(channel_id, ts).await
    }

    async fn send_typing(&self, channel_id: &str) -> Result<()> {
        self.inner.send_typing(channel_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_platform::{ChannelInfo, MockPlatform};

    #[tokio::test]
    async fn passthrough_post_message_succeeds_on_first_try() {
        let mock = Arc::new(MockPlatform::new("T1", "UBOT"));
        mock.seed_channel(ChannelInfo {
            id: "C1".into(),
            name: "staff".into(),
            members: Vec::new(),
            is_im: false,
            is_mpim: false,
        });
        let retrying = RetryingPlatform::new(mock);
        let ts = retrying
            .post_message(PostMessage {
                channel_id: "C1".into(),
                thread_ts: None,
                text: "hi".into(),
            })
            .await
            .unwrap();
        assert!(!ts.is_empty());
    }
}
