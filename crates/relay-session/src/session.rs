use std::collections::HashMap;

use relay_core::types::{attachment_ts, now_rfc3339, PlatformId, PlatformTs};
use relay_core::Result;
use relay_platform::{FileRef, PostMessage, UploadFile};
use relay_store::{NewMessageLog, StoredSession};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::MirrorContext;

/// Which half of a mirrored pair a timestamp belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Direct,
    Thread,
}

/// A live, in-memory session — spec.md §3 "Session" / §4.1.
///
/// `direct_index`/`conv_index` are rebuilt from the persisted message log on
/// load (see [`Session::from_stored`]) rather than persisted themselves; they
/// exist purely to make `has_log`/mirror lookups O(1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub bot_name: String,
    pub participants: Vec<PlatformId>,
    pub dm_channel_id: PlatformId,
    pub thread_id: PlatformTs,
    pub active: bool,
    pub updated_at: String,
    direct_index: HashMap<PlatformTs, PlatformTs>,
    conv_index: HashMap<PlatformTs, PlatformTs>,
}

impl Session {
    /// Canonical, sort-order-insensitive key used for participant-set lookups.
    pub fn participants_key(participants: &[PlatformId]) -> String {
        let mut sorted = participants.to_vec();
        sorted.sort();
        sorted.join(",")
    }

    /// Rebuild a live session (including its timestamp indices) from a
    /// persisted row. Used both at bot startup and after a fresh `create()`.
    pub fn from_stored(stored: StoredSession) -> Self {
        let mut direct_index = HashMap::new();
        let mut conv_index = HashMap::new();
        for entry in &stored.messages {
            direct_index.insert(entry.direct_ts.clone(), entry.conv_ts.clone());
            conv_index.insert(entry.conv_ts.clone(), entry.direct_ts.clone());
        }
        let participants = stored
            .participants
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        Session {
            id: stored.id,
            bot_name: stored.bot_name,
            participants,
            dm_channel_id: stored.dm_channel_id,
            thread_id: stored.thread_id,
            active: stored.active,
            updated_at: stored.updated_at,
            direct_index,
            conv_index,
        }
    }

    pub fn participants_key_for_self(&self) -> String {
        Self::participants_key(&self.participants)
    }

    /// O(1), pure: true iff `ts` is the thread anchor or appears on either
    /// side of the index.
    pub fn has_log(&self, ts: &str) -> bool {
        ts == self.thread_id || self.direct_index.contains_key(ts) || self.conv_index.contains_key(ts)
    }

    /// Look up the paired timestamp on the opposite side of a just-mirrored
    /// message, if known.
    pub fn peer_ts(&self, ts: &str) -> Option<String> {
        self.direct_index
            .get(ts)
            .or_else(|| self.conv_index.get(ts))
            .cloned()
    }

    fn record(&mut self, direct_ts: &str, conv_ts: &str) {
        self.direct_index
            .insert(direct_ts.to_string(), conv_ts.to_string());
        self.conv_index
            .insert(conv_ts.to_string(), direct_ts.to_string());
        self.active = true;
        self.updated_at = now_rfc3339();
    }

    /// Persist one log entry and update both indices. Only ever called from
    /// the owning bot's event loop.
    fn add_log(
        &mut self,
        ctx: &MirrorContext<'_>,
        author: &str,
        text: &str,
        direct_ts: &str,
        conv_ts: &str,
        original: bool,
    ) -> Result<()> {
        ctx.store.append_message_log(
            self.id,
            NewMessageLog {
                author_id: author.to_string(),
                text: text.to_string(),
                direct_ts: direct_ts.to_string(),
                conv_ts: conv_ts.to_string(),
                original,
            },
        )?;
        ctx.store.touch_session(self.id, true)?;
        self.record(direct_ts, conv_ts);
        Ok(())
    }

    fn tagged(ctx: &MirrorContext<'_>, author: &str, text: &str) -> String {
        ctx.lang
            .render("msgCopyFmt", &[("author", author), ("text", text)])
    }

    /// DM → thread.
    pub async fn mirror_incoming(
        &mut self,
        ctx: &MirrorContext<'_>,
        direct_ts: &str,
        text: &str,
        author: &str,
    ) -> Result<()> {
        let tagged = Self::tagged(ctx, author, text);
        let conv_ts = ctx
            .platform
            .post_message(PostMessage {
                channel_id: ctx.staff_channel_id.to_string(),
                thread_ts: Some(self.thread_id.clone()),
                text: tagged,
            })
            .await?;
        self.add_log(ctx, author, text, direct_ts, &conv_ts, true)
    }

    /// Thread → DM.
    pub async fn mirror_outgoing(
        &mut self,
        ctx: &MirrorContext<'_>,
        conv_ts: &str,
        text: &str,
        author: &str,
    ) -> Result<()> {
        let tagged = Self::tagged(ctx, author, text);
        let direct_ts = ctx
            .platform
            .post_message(PostMessage {
                channel_id: self.dm_channel_id.clone(),
                thread_ts: None,
                text: tagged,
            })
            .await?;
        self.add_log(ctx, author, text, &direct_ts, conv_ts, true)
    }

    /// Edit of a message already on `side`. A no-op if `ts` was never mirrored.
    pub async fn mirror_edit(
        &mut self,
        ctx: &MirrorContext<'_>,
        ts: &str,
        new_text: &str,
        author: &str,
        side: Side,
    ) -> Result<()> {
        let (direct_ts, conv_ts, target_channel, target_ts) = match side {
            Side::Direct => {
                let conv_ts = match self.direct_index.get(ts) {
                    Some(c) => c.clone(),
                    None => return Ok(()),
                };
                (
                    ts.to_string(),
                    conv_ts.clone(),
                    ctx.staff_channel_id.to_string(),
                    conv_ts,
                )
            }
            Side::Thread => {
                let direct_ts = match self.conv_index.get(ts) {
                    Some(d) => d.clone(),
                    None => return Ok(()),
                };
                (
                    direct_ts.clone(),
                    ts.to_string(),
                    self.dm_channel_id.clone(),
                    direct_ts,
                )
            }
        };

        let tagged = Self::tagged(ctx, author, new_text);
        ctx.platform
            .update_message(&target_channel, &target_ts, &tagged)
            .await?;
        self.add_log(ctx, author, new_text, &direct_ts, &conv_ts, false)
    }

    /// Best-effort: reactions never fail the caller.
    pub async fn mirror_reaction(
        &mut self,
        ctx: &MirrorContext<'_>,
        ts: &str,
        emoji: &str,
        side: Side,
        removed: bool,
    ) {
        let target = match side {
            Side::Direct => self
                .direct_index
                .get(ts)
                .map(|conv_ts| (ctx.staff_channel_id.to_string(), conv_ts.clone())),
            Side::Thread => self
                .conv_index
                .get(ts)
                .map(|direct_ts| (self.dm_channel_id.clone(), direct_ts.clone())),
        };
        let Some((channel_id, target_ts)) = target else {
            return;
        };

        let result = if removed {
            ctx.platform.remove_reaction(&channel_id, &target_ts, emoji).await
        } else {
            ctx.platform.add_reaction(&channel_id, &target_ts, emoji).await
        };
        if let Err(e) = result {
            warn!(error = %e, "reaction mirror failed");
        }
        if let Err(e) = ctx.store.touch_session(self.id, true) {
            warn!(error = %e, "touch_session failed after reaction mirror");
        } else {
            self.updated_at = now_rfc3339();
        }
    }

    /// Mirror an attachment from `side` to the opposite side. Oversized
    /// files get a localized rejection notice on both sides instead (this
    /// counts as success, not failure).
    pub async fn mirror_attachment(
        &mut self,
        ctx: &MirrorContext<'_>,
        file: &FileRef,
        parent_direct_ts: &str,
        parent_conv_ts: &str,
        author: &str,
        side: Side,
    ) -> Result<()> {
        if file.size > ctx.max_file_size {
            let notice = ctx.lang.render(
                "attachmentTooLarge",
                &[("name", &file.name), ("author", author)],
            );
            ctx.platform
                .post_message(PostMessage {
                    channel_id: self.dm_channel_id.clone(),
                    thread_ts: None,
                    text: notice.clone(),
                })
                .await?;
            ctx.platform
                .post_message(PostMessage {
                    channel_id: ctx.staff_channel_id.to_string(),
                    thread_ts: Some(self.thread_id.clone()),
                    text: notice,
                })
                .await?;
            return Ok(());
        }

        let bytes = ctx.platform.download_file(&file.url_private).await?;
        let (upload_channel, upload_thread) = match side {
            Side::Direct => (ctx.staff_channel_id.to_string(), Some(self.thread_id.clone())),
            Side::Thread => (self.dm_channel_id.clone(), None),
        };
        let uploaded = ctx
            .platform
            .upload_file(UploadFile {
                channel_id: upload_channel,
                thread_ts: upload_thread,
                filename: file.name.clone(),
                title: file.title.clone(),
                content_type: file.mimetype.clone(),
                bytes,
            })
            .await?;

        let synthetic_direct = attachment_ts(parent_direct_ts);
        let synthetic_conv = attachment_ts(parent_conv_ts);
        let rendered = ctx.lang.render("uploadedFile", &[("url", &uploaded.url)]);
        self.add_log(
            ctx,
            author,
            &rendered,
            &synthetic_direct,
            &synthetic_conv,
            false,
        )
    }

    /// Idempotent: sends the paired expiry notices once, then deactivates.
    pub async fn expire(&mut self, ctx: &MirrorContext<'_>) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        ctx.platform
            .post_message(PostMessage {
                channel_id: self.dm_channel_id.clone(),
                thread_ts: None,
                text: ctx.lang.render("sessionExpiredDirect", &[]),
            })
            .await?;
        ctx.platform
            .post_message(PostMessage {
                channel_id: ctx.staff_channel_id.to_string(),
                thread_ts: Some(self.thread_id.clone()),
                text: ctx
                    .lang
                    .render("sessionExpiredConv", &[("thread", &self.thread_id)]),
            })
            .await?;
        ctx.store.touch_session(self.id, false)?;
        self.active = false;
        Ok(())
    }

    /// Best-effort deletion of the anchor thread message after a creation
    /// failure. The session was never promoted to active, so no persistence
    /// row needs updating.
    pub async fn abandon(&self, ctx: &MirrorContext<'_>) {
        if let Err(e) = ctx
            .platform
            .delete_message(ctx.staff_channel_id, &self.thread_id)
            .await
        {
            warn!(error = %e, thread_id = %self.thread_id, "failed to abandon thread anchor");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_store::StoredMessageLog;

    fn stored() -> StoredSession {
        StoredSession {
            id: 1,
            bot_name: "alpha".into(),
            participants: "U2,U1".into(),
            dm_channel_id: "D1".into(),
            thread_id: "T1".into(),
            active: true,
            updated_at: "2026-01-01T00:00:00Z".into(),
            messages: vec![StoredMessageLog {
                id: 1,
                session_id: 1,
                author_id: "U1".into(),
                text: "hi".into(),
                direct_ts: "1.1".into(),
                conv_ts: "2.1".into(),
                original: true,
            }],
        }
    }

    #[test]
    fn from_stored_rebuilds_both_indices() {
        let s = Session::from_stored(stored());
        assert!(s.has_log("1.1"));
        assert!(s.has_log("2.1"));
        assert!(s.has_log("T1"));
        assert!(!s.has_log("9.9"));
    }

    #[test]
    fn participants_key_is_order_insensitive() {
        let a = Session::participants_key(&["U2".to_string(), "U1".to_string()]);
        let b = Session::participants_key(&["U1".to_string(), "U2".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn participants_parsed_sorted_from_stored_string() {
        let s = Session::from_stored(stored());
        assert_eq!(s.participants, vec!["U2".to_string(), "U1".to_string()]);
    }
}
