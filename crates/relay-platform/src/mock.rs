use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use relay_core::types::{PlatformId, PlatformTs};
use relay_core::{RelayError, Result};
use tokio::sync::mpsc;

use crate::client::PlatformClient;
use crate::types::{
    ChannelInfo, ConnectedInfo, PlatformEvent, PostMessage, UploadFile, UploadedFile, UserInfo,
};

/// In-memory fake of the chat platform, used by the test suite and by the
/// bundled demo binary. A real deployment swaps this for an adapter over an
/// actual vendor SDK; the core never notices the difference because it only
/// ever sees [`PlatformClient`].
pub struct MockPlatform {
    state: Mutex<State>,
    events_tx: mpsc::Sender<PlatformEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<PlatformEvent>>>,
    ts_seq: AtomicU64,
    bot_user_id: PlatformId,
    workspace_id: PlatformId,
}

struct State {
    /// channel_id -> ts -> text (mutated in place by edits).
    messages: HashMap<PlatformId, HashMap<PlatformTs, String>>,
    /// channel_id -> set of reactions as (ts, emoji) pairs.
    reactions: HashMap<(PlatformId, PlatformTs), Vec<String>>,
    channels: HashMap<PlatformId, ChannelInfo>,
    users: HashMap<PlatformId, UserInfo>,
    /// (sorted, joined) user ids -> dm channel id, so repeated opens are idempotent.
    dms: HashMap<String, PlatformId>,
    next_dm_seq: u64,
}

impl MockPlatform {
    pub fn new(workspace_id: impl Into<PlatformId>, bot_user_id: impl Into<PlatformId>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        Self {
            state: Mutex::new(State {
                messages: HashMap::new(),
                reactions: HashMap::new(),
                channels: HashMap::new(),
                users: HashMap::new(),
                dms: HashMap::new(),
                next_dm_seq: 0,
            }),
            events_tx: tx,
            events_rx: Mutex::new(Some(rx)),
            ts_seq: AtomicU64::new(1),
            bot_user_id: bot_user_id.into(),
            workspace_id: workspace_id.into(),
        }
    }

    /// Deterministic, monotonically increasing synthetic timestamp in the
    /// "seconds.micros" shape real chat platforms use.
    pub fn next_ts(&self) -> PlatformTs {
        let n = self.ts_seq.fetch_add(1, Ordering::SeqCst);
        format!("{}.{:06}", 1_700_000_000 + n / 1_000_000, n % 1_000_000)
    }

    /// Register a user for `user_info` lookups.
    pub fn seed_user(&self, user: UserInfo) {
        self.state.lock().unwrap().users.insert(user.id.clone(), user);
    }

    /// Register a channel (used for the staff channel and for DM lookups).
    pub fn seed_channel(&self, channel: ChannelInfo) {
        self.state
            .lock()
            .unwrap()
            .channels
            .insert(channel.id.clone(), channel);
    }

    /// Push an inbound event as if the realtime stream produced it. Test-only
    /// driver for simulating outsider/operator activity.
    pub async fn inject(&self, event: PlatformEvent) {
        let _ = self.events_tx.send(event).await;
    }

    /// Read back a mirrored message's current text (post-edit value).
    pub fn message_text(&self, channel_id: &str, ts: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .messages
            .get(channel_id)
            .and_then(|m| m.get(ts))
            .cloned()
    }

    pub fn reactions_on(&self, channel_id: &str, ts: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .reactions
            .get(&(channel_id.to_string(), ts.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    async fn connect(&self) -> Result<ConnectedInfo> {
        Ok(ConnectedInfo {
            workspace_id: self.workspace_id.clone(),
            bot_user_id: self.bot_user_id.clone(),
        })
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    fn take_event_receiver(&self) -> Option<mpsc::Receiver<PlatformEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    async fn post_message(&self, req: PostMessage) -> Result<PlatformTs> {
        let ts = self.next_ts();
        let mut state = self.state.lock().unwrap();
        state
            .messages
            .entry(req.channel_id.clone())
            .or_default()
            .insert(ts.clone(), req.text);
        Ok(ts)
    }

    async fn update_message(&self, channel_id: &str, ts: &str, text: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state
            .messages
            .get_mut(channel_id)
            .and_then(|m| m.get_mut(ts))
        {
            Some(slot) => {
                *slot = text.to_string();
                Ok(())
            }
            None => Err(RelayError::NotFound(format!("{channel_id}:{ts}"))),
        }
    }

    async fn delete_message(&self, channel_id: &str, ts: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(m) = state.messages.get_mut(channel_id) {
            m.remove(ts);
        }
        Ok(())
    }

    async fn add_reaction(&self, channel_id: &str, ts: &str, emoji: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let key = (channel_id.to_string(), ts.to_string());
        let list = state.reactions.entry(key).or_default();
        if !list.iter().any(|e| e == emoji) {
            list.push(emoji.to_string());
        }
        Ok(())
    }

    async fn remove_reaction(&self, channel_id: &str, ts: &str, emoji: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let key = (channel_id.to_string(), ts.to_string());
        if let Some(list) = state.reactions.get_mut(&key) {
            list.retain(|e| e != emoji);
        }
        Ok(())
    }

    async fn open_dm(&self, user_ids: &[PlatformId]) -> Result<PlatformId> {
        let mut sorted = user_ids.to_vec();
        sorted.sort();
        let key = sorted.join(",");
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.dms.get(&key) {
            return Ok(existing.clone());
        }
        state.next_dm_seq += 1;
        let dm_id = format!("D{:06}", state.next_dm_seq);
        state.dms.insert(key, dm_id.clone());
        Ok(dm_id)
    }

    async fn download_file(&self, url: &str) -> Result<Vec<u8>> {
        Ok(url.as_bytes().to_vec())
    }

    async fn upload_file(&self, req: UploadFile) -> Result<UploadedFile> {
        let ts = self.next_ts();
        let url = format!("https://files.mock.test/{}/{}", req.channel_id, req.filename);
        let mut state = self.state.lock().unwrap();
        state
            .messages
            .entry(req.channel_id)
            .or_default()
            .insert(ts.clone(), format!("<{url}>"));
        Ok(UploadedFile { url, ts })
    }

    async fn channel_info(&self, channel_id: &str) -> Result<ChannelInfo> {
        self.state
            .lock()
            .unwrap()
            .channels
            .get(channel_id)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(channel_id.to_string()))
    }

    async fn user_info(&self, user_id: &str) -> Result<UserInfo> {
        self.state
            .lock()
            .unwrap()
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(user_id.to_string()))
    }

    async fn invite_to_channel(&self, channel_id: &str, user_ids: &[PlatformId]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(ch) = state.channels.get_mut(channel_id) {
            for id in user_ids {
                if !ch.members.contains(id) {
                    ch.members.push(id.clone());
                }
            }
        }
        Ok(())
    }

    async fn kick_from_channel(&self, channel_id: &str, user_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(ch) = state.channels.get_mut(channel_id) {
            ch.members.retain(|m| m != user_id);
        }
        Ok(())
    }

    async fn permalink(&self, channel_id: &str, ts: &str) -> Result<String> {
        Ok(format!("https://mock.test/archives/{channel_id}/p{ts}"))
    }

    async fn send_typing(&self, _channel_id: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChannelInfo;

    #[tokio::test]
    async fn post_then_update_then_delete_roundtrips() {
        let p = MockPlatform::new("T1", "UBOT");
        let ts = p
            .post_message(PostMessage {
                channel_id: "C1".into(),
                thread_ts: None,
                text: "hi".into(),
            })
            .await
            .unwrap();
        assert_eq!(p.message_text("C1", &ts).as_deref(), Some("hi"));

        p.update_message("C1", &ts, "hi!").await.unwrap();
        assert_eq!(p.message_text("C1", &ts).as_deref(), Some("hi!"));

        p.delete_message("C1", &ts).await.unwrap();
        assert_eq!(p.message_text("C1", &ts), None);
    }

    #[tokio::test]
    async fn reactions_add_and_remove() {
        let p = MockPlatform::new("T1", "UBOT");
        p.add_reaction("C1", "1.1", "eyes").await.unwrap();
        assert_eq!(p.reactions_on("C1", "1.1"), vec!["eyes".to_string()]);
        p.remove_reaction("C1", "1.1", "eyes").await.unwrap();
        assert!(p.reactions_on("C1", "1.1").is_empty());
    }

    #[tokio::test]
    async fn open_dm_is_idempotent_regardless_of_order() {
        let p = MockPlatform::new("T1", "UBOT");
        let a = p.open_dm(&["U2".into(), "U1".into()]).await.unwrap();
        let b = p.open_dm(&["U1".into(), "U2".into()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn event_receiver_can_only_be_taken_once() {
        let p = MockPlatform::new("T1", "UBOT");
        assert!(p.take_event_receiver().is_some());
        assert!(p.take_event_receiver().is_none());
    }

    #[tokio::test]
    async fn kick_removes_member() {
        let p = MockPlatform::new("T1", "UBOT");
        p.seed_channel(ChannelInfo {
            id: "C1".into(),
            name: "staff".into(),
            members: vec!["U1".into(), "U2".into()],
            is_im: false,
            is_mpim: false,
        });
        p.kick_from_channel("C1", "U1").await.unwrap();
        let info = p.channel_info("C1").await.unwrap();
        assert_eq!(info.members, vec!["U2".to_string()]);
    }
}
