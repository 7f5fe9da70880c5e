use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::config::BotConfig;
use relay_core::lang::LangTable;
use relay_core::types::parse_rfc3339;
use relay_core::{RelayError, Result};
use relay_platform::{
    ChannelInfo, MemberEvent, MessageEditedEvent, MessageEvent, PlatformClient, PostMessage,
    ReactionEvent, UserInfo,
};
use relay_session::{Initiator, Session, Side};
use relay_store::{HistoryPage, Store};
use tracing::warn;

use relay_commands::{
    ActiveSessionSummary, CmdParams, CommandContext, CommandOutcome, CommandRegistry,
    ParsedCommand, SupervisorContext,
};

use crate::cache::Cache;

/// Bounded cache capacity for both the channel- and user-info memoisation —
/// the same figure `skynet-users::resolver::UserResolver` uses.
const CACHE_CAPACITY: usize = 256;

/// Build a [`relay_session::MirrorContext`] borrowing only the fields it
/// needs. Written as a macro rather than a `&self` method so the borrow
/// checker sees the individual field borrows in the caller — a method call
/// would widen the borrow to all of `self`, conflicting with the `&mut
/// self.sessions[idx]` borrows every caller also needs alongside it.
macro_rules! build_ctx {
    ($self:expr) => {
        relay_session::MirrorContext {
            platform: $self.platform.as_ref(),
            store: $self.store.as_ref(),
            lang: &$self.lang,
            staff_channel_id: &$self.config.chan_id,
            max_file_size: $self.config.max_file_size,
        }
    };
}

/// One tenant's live bot process — spec.md §4.3. Owns its sessions,
/// blacklist, invitation list, and staff-channel membership in memory,
/// backed by a [`Store`] for durability. Grounded on `original_source`'s
/// `Mother`/`conversation.go`/`events.go` trio, generalised from one global
/// `mother` to a struct instantiated once per `bot_config/*.json` file.
pub struct BotInstance {
    name: String,
    config: BotConfig,
    platform: Arc<dyn PlatformClient>,
    store: Arc<dyn Store>,
    supervisor: Arc<dyn SupervisorContext>,
    lang: LangTable,
    self_user_id: String,
    workspace_id: Option<String>,
    sessions: Vec<Session>,
    invited: Vec<String>,
    blacklist: BTreeSet<String>,
    staff_members: BTreeSet<String>,
    channel_cache: Mutex<Cache<ChannelInfo>>,
    user_cache: Mutex<Cache<UserInfo>>,
    connected_at: DateTime<Utc>,
}

impl BotInstance {
    /// `platform` should already be wrapped in
    /// [`crate::platform_retry::RetryingPlatform`] by the caller — every
    /// outbound post this instance makes goes through it.
    pub fn new(
        name: String,
        config: BotConfig,
        platform: Arc<dyn PlatformClient>,
        store: Arc<dyn Store>,
        supervisor: Arc<dyn SupervisorContext>,
    ) -> Self {
        let lang = LangTable::new(config.lang.clone());
        Self {
            name,
            config,
            platform,
            store,
            supervisor,
            lang,
            self_user_id: String::new(),
            workspace_id: None,
            sessions: Vec::new(),
            invited: Vec::new(),
            blacklist: BTreeSet::new(),
            staff_members: BTreeSet::new(),
            channel_cache: Mutex::new(Cache::new(CACHE_CAPACITY)),
            user_cache: Mutex::new(Cache::new(CACHE_CAPACITY)),
            connected_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.workspace_id.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.connected_at).num_seconds().max(0) as u64
    }

    pub fn platform(&self) -> Arc<dyn PlatformClient> {
        self.platform.clone()
    }

    pub fn timeout_check_interval(&self) -> std::time::Duration {
        self.config.timeout_check_interval()
    }

    /// Establish the realtime connection, discover identity, and preload
    /// blacklist/sessions/invitations/staff roster from the store and
    /// platform. Spec.md §4.3.1/§4.7.
    pub async fn connect(mut self) -> Result<Self> {
        let info = self.platform.connect().await?;
        self.self_user_id = info.bot_user_id;
        self.workspace_id = Some(info.workspace_id);
        self.connected_at = Utc::now();

        let stored = self.store.upsert_bot(
            &self.name,
            self.workspace_id.as_deref(),
            self.config.session_timeout_secs as i64,
        )?;
        self.blacklist = stored.blacklist.into_iter().collect();
        self.sessions = stored.sessions.into_iter().map(Session::from_stored).collect();
        self.invited = self.store.list_invited(&self.name)?;

        if let Ok(info) = self.platform.channel_info(&self.config.chan_id).await {
            self.staff_members = info
                .members
                .into_iter()
                .filter(|m| m != &self.self_user_id)
                .collect();
        }

        Ok(self)
    }

    async fn cached_channel_info(&self, channel_id: &str) -> Result<ChannelInfo> {
        if let Some(info) = self.channel_cache.lock().unwrap().get(channel_id) {
            return Ok(info);
        }
        let info = self.platform.channel_info(channel_id).await?;
        self.channel_cache
            .lock()
            .unwrap()
            .insert(channel_id, info.clone());
        Ok(info)
    }

    async fn cached_user_info(&self, user_id: &str) -> Result<UserInfo> {
        if let Some(info) = self.user_cache.lock().unwrap().get(user_id) {
            return Ok(info);
        }
        let info = self.platform.user_info(user_id).await?;
        self.user_cache.lock().unwrap().insert(user_id, info.clone());
        Ok(info)
    }

    async fn is_admin(&self, user_id: &str) -> bool {
        self.cached_user_info(user_id)
            .await
            .map(|u| u.is_admin)
            .unwrap_or(false)
    }

    async fn dm_participants(&self, channel_id: &str) -> Vec<String> {
        match self.cached_channel_info(channel_id).await {
            Ok(info) => info
                .members
                .into_iter()
                .filter(|m| m != &self.self_user_id)
                .collect(),
            Err(e) => {
                warn!(error = %e, channel_id, "channel_info lookup failed while resolving participants");
                Vec::new()
            }
        }
    }

    fn session_idx_by_dm(&self, dm_channel_id: &str) -> Option<usize> {
        self.sessions
            .iter()
            .position(|s| s.active && s.dm_channel_id == dm_channel_id)
    }

    fn session_idx_by_participants(&self, key: &str) -> Option<usize> {
        self.sessions
            .iter()
            .position(|s| s.active && s.participants_key_for_self() == key)
    }

    fn session_idx_by_ts(&self, ts: &str) -> Option<usize> {
        self.sessions.iter().position(|s| s.active && s.has_log(ts))
    }

    /// After `new_session` is pushed, any other in-memory entry sharing its
    /// DM is stale (invariant: at most one active session per DM). Flips the
    /// in-memory flag and persists the deactivation itself, since
    /// `Initiator::create`'s own `touch_session` call only fires for the
    /// session it was explicitly told it was switching from.
    fn sync_active_flags(&mut self, new_session: &Session) {
        for s in self.sessions.iter_mut() {
            if s.id != new_session.id && s.dm_channel_id == new_session.dm_channel_id && s.active {
                s.active = false;
                if let Err(e) = self.store.touch_session(s.id, false) {
                    warn!(error = %e, session_id = s.id, "failed to persist stale-session deactivation");
                }
            }
        }
    }

    /// Top-level dispatch for every inbound message — spec.md §4.3.3.
    pub async fn handle_message(&mut self, event: MessageEvent, registry: &CommandRegistry) {
        if event.user_id == self.self_user_id {
            return;
        }
        if event.channel_id == self.config.chan_id {
            self.handle_staff_message(event, registry).await;
        } else {
            self.handle_dm_message(event, registry).await;
        }
    }

    async fn handle_staff_message(&mut self, event: MessageEvent, registry: &CommandRegistry) {
        if let Some(thread_ts) = event.thread_ts.clone() {
            if let Some(idx) = self.session_idx_by_ts(&thread_ts) {
                let ctx = build_ctx!(self);
                let direct_ts = match self.sessions[idx]
                    .mirror_outgoing(&ctx, &event.ts, &event.text, &event.user_id)
                    .await
                {
                    Ok(()) => self.sessions[idx].peer_ts(&event.ts),
                    Err(e) => {
                        warn!(error = %e, "mirror_outgoing failed");
                        None
                    }
                };
                if let Some(direct_ts) = direct_ts {
                    for file in &event.files {
                        let ctx = build_ctx!(self);
                        if let Err(e) = self.sessions[idx]
                            .mirror_attachment(&ctx, file, &direct_ts, &event.ts, &event.user_id, Side::Thread)
                            .await
                        {
                            warn!(error = %e, "mirror_attachment (thread->dm) failed");
                        }
                    }
                }
                return;
            }
        }

        let Some(parsed) = relay_commands::parse(&event.text) else {
            return;
        };
        if event.thread_ts.is_none() && !self.config.allow_commands_in_channel {
            return;
        }
        self.dispatch_command(
            parsed,
            event.channel_id.clone(),
            event.thread_ts.clone(),
            event.user_id.clone(),
            event.ts.clone(),
            registry,
        )
        .await;
    }

    async fn handle_dm_message(&mut self, event: MessageEvent, registry: &CommandRegistry) {
        let participants = self.dm_participants(&event.channel_id).await;
        if participants.iter().any(|id| self.blacklist.contains(id)) {
            return;
        }

        if let Some(parsed) = relay_commands::parse(&event.text) {
            let is_staff_context = self.staff_members.contains(&event.user_id)
                || participants.iter().any(|id| self.staff_members.contains(id))
                || self.is_admin(&event.user_id).await;

            if is_staff_context {
                self.dispatch_command(
                    parsed,
                    event.channel_id.clone(),
                    event.thread_ts.clone(),
                    event.user_id.clone(),
                    event.ts.clone(),
                    registry,
                )
                .await;
            } else {
                let notice = self.lang.render("outsiderCommandNotice", &[]);
                if !notice.is_empty() {
                    if let Err(e) = self
                        .platform
                        .post_message(PostMessage {
                            channel_id: event.channel_id.clone(),
                            thread_ts: None,
                            text: notice,
                        })
                        .await
                    {
                        warn!(error = %e, "failed to send outsider-command notice");
                    }
                }
            }
            return;
        }

        self.mirror_incoming_dm(event, participants).await;
    }

    async fn mirror_incoming_dm(&mut self, event: MessageEvent, participants: Vec<String>) {
        if let Some(idx) = self.session_idx_by_dm(&event.channel_id) {
            let ctx = build_ctx!(self);
            match self.sessions[idx]
                .mirror_incoming(&ctx, &event.ts, &event.text, &event.user_id)
                .await
            {
                Ok(()) => {
                    if let Some(conv_ts) = self.sessions[idx].peer_ts(&event.ts) {
                        for file in &event.files {
                            let ctx = build_ctx!(self);
                            if let Err(e) = self.sessions[idx]
                                .mirror_attachment(&ctx, file, &event.ts, &conv_ts, &event.user_id, Side::Direct)
                                .await
                            {
                                warn!(error = %e, "mirror_attachment (dm->thread) failed");
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, "mirror_incoming failed"),
            }
            return;
        }

        let ctx = build_ctx!(self);
        match Initiator::new(&ctx, self.name.clone())
            .post_new_thread(&event.channel_id, &participants)
            .await
            .create(None)
            .await
        {
            Ok(mut session) => {
                if let Err(e) = session
                    .mirror_incoming(&ctx, &event.ts, &event.text, &event.user_id)
                    .await
                {
                    warn!(error = %e, "mirror_incoming on freshly created session failed");
                }
                self.sync_active_flags(&session);
                self.sessions.push(session);
            }
            Err(e) => warn!(error = %e, "failed to create session for incoming dm"),
        }
    }

    async fn dispatch_command(
        &mut self,
        parsed: ParsedCommand,
        channel_id: String,
        thread_id: Option<String>,
        user_id: String,
        invoking_ts: String,
        registry: &CommandRegistry,
    ) {
        let params = CmdParams {
            channel_id: channel_id.clone(),
            thread_id,
            user_id,
            args: parsed.args,
        };
        let supervisor = self.supervisor.clone();
        let outcome = registry
            .dispatch(&parsed.name, self, Some(supervisor.as_ref()), &params)
            .await;

        let emoji_key = match outcome {
            CommandOutcome::Success => "reactSuccess",
            CommandOutcome::Failure => "reactFailure",
            CommandOutcome::Unknown => "reactUnknown",
        };
        let emoji = self.lang.render(emoji_key, &[]);
        if !emoji.is_empty() {
            if let Err(e) = self.platform.add_reaction(&channel_id, &invoking_ts, &emoji).await {
                warn!(error = %e, "failed to react to command invocation");
            }
        }
    }

    pub async fn handle_message_edited(&mut self, event: MessageEditedEvent) {
        if event.user_id == self.self_user_id {
            return;
        }
        let side = if event.channel_id == self.config.chan_id {
            Side::Thread
        } else {
            Side::Direct
        };
        if let Some(idx) = self.session_idx_by_ts(&event.ts) {
            let ctx = build_ctx!(self);
            if let Err(e) = self.sessions[idx]
                .mirror_edit(&ctx, &event.ts, &event.new_text, &event.user_id, side)
                .await
            {
                warn!(error = %e, "mirror_edit failed");
            }
        }
    }

    pub async fn handle_reaction(&mut self, event: ReactionEvent, removed: bool) {
        if event.user_id == self.self_user_id {
            return;
        }
        let side = if event.channel_id == self.config.chan_id {
            Side::Thread
        } else {
            Side::Direct
        };
        if let Some(idx) = self.session_idx_by_ts(&event.ts) {
            let ctx = build_ctx!(self);
            self.sessions[idx]
                .mirror_reaction(&ctx, &event.ts, &event.emoji, side, removed)
                .await;
        }
    }

    /// A user appeared in the staff channel: kick them if they were never
    /// invited (admin rights only — matches `events.go`'s
    /// `handleMemberJoinedChannelEvent`), otherwise clear their invitation
    /// and fold them into the staff roster, deactivating any session they
    /// were a participant of.
    pub async fn handle_member_joined(&mut self, event: MemberEvent) {
        if event.channel_id != self.config.chan_id {
            return;
        }
        let self_id = self.self_user_id.clone();
        if self.is_admin(&self_id).await {
            if !self.invited.contains(&event.user_id) {
                if let Err(e) = self
                    .platform
                    .kick_from_channel(&self.config.chan_id, &event.user_id)
                    .await
                {
                    warn!(error = %e, "failed to kick uninvited staff-channel member");
                }
                return;
            }
            self.invited.retain(|id| id != &event.user_id);
            if let Err(e) = self.store.remove_invited(&self.name, &event.user_id) {
                warn!(error = %e, "failed to clear invited row");
            }
        }
        self.staff_members.insert(event.user_id.clone());
        self.deactivate_user(&event.user_id).await;
    }

    pub async fn handle_member_left(&mut self, event: MemberEvent) {
        if event.channel_id != self.config.chan_id {
            return;
        }
        self.staff_members.remove(&event.user_id);
    }

    async fn deactivate_user(&mut self, user_id: &str) {
        let idxs: Vec<usize> = self
            .sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.active && s.participants.iter().any(|p| p == user_id))
            .map(|(i, _)| i)
            .collect();
        for idx in idxs {
            let ctx = build_ctx!(self);
            if let Err(e) = self.sessions[idx].expire(&ctx).await {
                warn!(error = %e, "failed to expire session after a participant became staff");
            }
        }
    }

    /// Spoof typing into the staff channel for a DM/group-DM the bot hasn't
    /// yet mirrored — matches `events.go`'s `handleUserTypingEvent`.
    pub async fn handle_user_typing(&mut self, event: MemberEvent) {
        if self.staff_members.contains(&event.user_id) || self.blacklist.contains(&event.user_id) {
            return;
        }
        if let Ok(info) = self.cached_channel_info(&event.channel_id).await {
            if info.is_im || info.is_mpim {
                if let Err(e) = self.platform.send_typing(&self.config.chan_id).await {
                    warn!(error = %e, "failed to relay typing indicator");
                }
            }
        }
    }

    /// The bot was added to some other channel/group — it only ever
    /// operates out of the one configured staff channel, so it leaves
    /// (kicks itself from) anything else.
    pub async fn handle_channel_joined(&mut self, channel_id: String) {
        if channel_id != self.config.chan_id {
            if let Err(e) = self.platform.kick_from_channel(&channel_id, &self.self_user_id).await {
                warn!(error = %e, channel_id, "failed to leave unexpected channel");
            }
        }
    }

    /// Called on a cross-bot blacklist broadcast (spec.md §4.4's "blacklist"
    /// producer) — no user-facing notice, just persistence + in-memory sync.
    pub async fn apply_cross_bot_blacklist(&mut self, user_id: &str) {
        if let Err(e) = self.store.add_blacklist(&self.name, user_id) {
            warn!(error = %e, "failed to persist cross-bot blacklist entry");
            return;
        }
        self.blacklist.insert(user_id.to_string());
    }

    /// One reaper tick: expire timed-out sessions, prune stale cache
    /// entries, and spoof a typing indicator to stay "present" in the staff
    /// channel — spec.md §4.3.8/§4.4.
    pub async fn scrub(&mut self) {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(self.config.session_timeout_secs as i64);
        let stale: Vec<usize> = self
            .sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.active && is_stale(&s.updated_at, timeout, now))
            .map(|(i, _)| i)
            .collect();
        for idx in stale {
            let ctx = build_ctx!(self);
            if let Err(e) = self.sessions[idx].expire(&ctx).await {
                warn!(error = %e, "reaper failed to expire a timed-out session");
            }
        }

        self.channel_cache
            .lock()
            .unwrap()
            .prune_older_than(self.config.session_timeout());
        self.user_cache
            .lock()
            .unwrap()
            .prune_older_than(self.config.session_timeout());

        if let Err(e) = self.platform.send_typing(&self.config.chan_id).await {
            warn!(error = %e, "spoof typing tick failed");
        }
    }
}

fn is_stale(updated_at: &str, timeout: chrono::Duration, now: DateTime<Utc>) -> bool {
    match parse_rfc3339(updated_at) {
        Some(dt) => now - dt > timeout,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use relay_commands::CommandContext;
    use relay_platform::{ChannelInfo, MockPlatform, UserInfo};
    use relay_store::SqliteStore;

    use super::*;

    struct NoopSupervisor;

    #[async_trait]
    impl SupervisorContext for NoopSupervisor {
        async fn load(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn unload(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn reload(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        fn uptimes(&self, _caller_workspace: Option<&str>) -> Vec<(String, Option<String>, u64)> {
            Vec::new()
        }
    }

    fn test_config(chan_id: &str, lang: HashMap<String, String>) -> BotConfig {
        BotConfig {
            token: "xoxb-test".into(),
            chan_id: chan_id.into(),
            enabled: true,
            max_file_size: 5_000_000,
            session_timeout_secs: 3600,
            timeout_check_interval_secs: 3600,
            threads_per_page: 10,
            allow_commands_in_channel: false,
            lang,
        }
    }

    async fn new_bot(chan_id: &str, platform: Arc<dyn PlatformClient>, lang: HashMap<String, String>) -> BotInstance {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(":memory:").unwrap());
        let supervisor: Arc<dyn SupervisorContext> = Arc::new(NoopSupervisor);
        BotInstance::new("acme".into(), test_config(chan_id, lang), platform, store, supervisor)
            .connect()
            .await
            .unwrap()
    }

    fn dm_event(channel_id: &str, user_id: &str, text: &str, ts: &str) -> MessageEvent {
        MessageEvent {
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            text: text.into(),
            ts: ts.into(),
            thread_ts: None,
            is_dm: true,
            is_group_dm: false,
            files: Vec::new(),
        }
    }

    #[tokio::test]
    async fn inbound_dm_creates_session_and_mirrors_to_staff_thread() {
        let mock = Arc::new(MockPlatform::new("T1", "UBOT"));
        mock.seed_channel(ChannelInfo {
            id: "CSTAFF".into(),
            name: "staff".into(),
            members: vec!["UBOT".into()],
            is_im: false,
            is_mpim: false,
        });
        mock.seed_channel(ChannelInfo {
            id: "D1".into(),
            name: "dm".into(),
            members: vec!["UBOT".into(), "U1".into()],
            is_im: true,
            is_mpim: false,
        });
        let mut bot = new_bot("CSTAFF", mock.clone(), HashMap::new()).await;
        let registry = CommandRegistry::with_defaults();

        bot.handle_message(dm_event("D1", "U1", "hello", "1.1"), &registry)
            .await;

        let sessions = bot.active_sessions();
        assert_eq!(sessions.len(), 1);
        let thread_id = sessions[0].thread_id.clone();

        let log = bot.logs_for(&[], Some(&thread_id), true).unwrap();
        assert!(log.contains("hello"), "log was: {log}");
    }

    #[tokio::test]
    async fn staff_thread_reply_mirrors_back_to_dm() {
        let mock = Arc::new(MockPlatform::new("T1", "UBOT"));
        mock.seed_channel(ChannelInfo {
            id: "CSTAFF".into(),
            name: "staff".into(),
            members: vec!["UBOT".into()],
            is_im: false,
            is_mpim: false,
        });
        mock.seed_channel(ChannelInfo {
            id: "D1".into(),
            name: "dm".into(),
            members: vec!["UBOT".into(), "U1".into()],
            is_im: true,
            is_mpim: false,
        });
        let mut bot = new_bot("CSTAFF", mock.clone(), HashMap::new()).await;
        let registry = CommandRegistry::with_defaults();

        bot.handle_message(dm_event("D1", "U1", "hello", "1.1"), &registry)
            .await;
        let thread_id = bot.active_sessions()[0].thread_id.clone();

        bot.handle_message(
            MessageEvent {
                channel_id: "CSTAFF".into(),
                user_id: "USTAFF1".into(),
                text: "reply from staff".into(),
                ts: "2.1".into(),
                thread_ts: Some(thread_id.clone()),
                is_dm: false,
                is_group_dm: false,
                files: Vec::new(),
            },
            &registry,
        )
        .await;

        let log = bot.logs_for(&[], Some(&thread_id), true).unwrap();
        assert!(log.contains("reply from staff"), "log was: {log}");
    }

    #[tokio::test]
    async fn outsider_command_attempt_is_not_mirrored_or_dispatched() {
        let mock = Arc::new(MockPlatform::new("T1", "UBOT"));
        mock.seed_channel(ChannelInfo {
            id: "CSTAFF".into(),
            name: "staff".into(),
            members: vec!["UBOT".into()],
            is_im: false,
            is_mpim: false,
        });
        mock.seed_channel(ChannelInfo {
            id: "D1".into(),
            name: "dm".into(),
            members: vec!["UBOT".into(), "U1".into()],
            is_im: true,
            is_mpim: false,
        });
        let mut bot = new_bot("CSTAFF", mock.clone(), HashMap::new()).await;
        let registry = CommandRegistry::with_defaults();

        bot.handle_message(dm_event("D1", "U1", "!help", "1.1"), &registry)
            .await;

        assert!(bot.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn blacklisted_participant_dm_is_dropped() {
        let mock = Arc::new(MockPlatform::new("T1", "UBOT"));
        mock.seed_channel(ChannelInfo {
            id: "CSTAFF".into(),
            name: "staff".into(),
            members: vec!["UBOT".into()],
            is_im: false,
            is_mpim: false,
        });
        mock.seed_channel(ChannelInfo {
            id: "D1".into(),
            name: "dm".into(),
            members: vec!["UBOT".into(), "U1".into()],
            is_im: true,
            is_mpim: false,
        });
        let mut bot = new_bot("CSTAFF", mock.clone(), HashMap::new()).await;
        bot.add_blacklist("U1").await.unwrap();
        let registry = CommandRegistry::with_defaults();

        bot.handle_message(dm_event("D1", "U1", "hello", "1.1"), &registry)
            .await;

        assert!(bot.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn scrub_expires_stale_sessions() {
        let mock = Arc::new(MockPlatform::new("T1", "UBOT"));
        mock.seed_channel(ChannelInfo {
            id: "CSTAFF".into(),
            name: "staff".into(),
            members: vec!["UBOT".into()],
            is_im: false,
            is_mpim: false,
        });
        mock.seed_channel(ChannelInfo {
            id: "D1".into(),
            name: "dm".into(),
            members: vec!["UBOT".into(), "U1".into()],
            is_im: true,
            is_mpim: false,
        });
        let mut bot = new_bot("CSTAFF", mock.clone(), HashMap::new()).await;
        let registry = CommandRegistry::with_defaults();

        bot.handle_message(dm_event("D1", "U1", "hello", "1.1"), &registry)
            .await;
        assert_eq!(bot.active_sessions().len(), 1);

        bot.sessions[0].updated_at = "2020-01-01T00:00:00Z".to_string();
        bot.scrub().await;

        assert!(bot.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn member_joined_without_invite_is_kicked_when_self_is_admin() {
        let mock = Arc::new(MockPlatform::new("T1", "UBOT"));
        mock.seed_user(UserInfo {
            id: "UBOT".into(),
            name: "bot".into(),
            is_admin: true,
            is_bot: true,
        });
        mock.seed_channel(ChannelInfo {
            id: "CSTAFF".into(),
            name: "staff".into(),
            members: vec!["UBOT".into(), "UNEW".into()],
            is_im: false,
            is_mpim: false,
        });
        let mut bot = new_bot("CSTAFF", mock.clone(), HashMap::new()).await;

        bot.handle_member_joined(MemberEvent {
            channel_id: "CSTAFF".into(),
            user_id: "UNEW".into(),
        })
        .await;

        let info = mock.channel_info("CSTAFF").await.unwrap();
        assert!(!info.members.contains(&"UNEW".to_string()));
        assert!(!bot.has_member("UNEW"));
    }

    #[tokio::test]
    async fn invited_member_joining_is_promoted_to_staff() {
        let mock = Arc::new(MockPlatform::new("T1", "UBOT"));
        mock.seed_user(UserInfo {
            id: "UBOT".into(),
            name: "bot".into(),
            is_admin: true,
            is_bot: true,
        });
        mock.seed_channel(ChannelInfo {
            id: "CSTAFF".into(),
            name: "staff".into(),
            members: vec!["UBOT".into(), "UNEW".into()],
            is_im: false,
            is_mpim: false,
        });
        let mut bot = new_bot("CSTAFF", mock.clone(), HashMap::new()).await;
        bot.invite(&["UNEW".to_string()]).await.unwrap();

        bot.handle_member_joined(MemberEvent {
            channel_id: "CSTAFF".into(),
            user_id: "UNEW".into(),
        })
        .await;

        let info = mock.channel_info("CSTAFF").await.unwrap();
        assert!(info.members.contains(&"UNEW".to_string()));
        assert!(bot.has_member("UNEW"));
    }

    #[tokio::test]
    async fn apply_cross_bot_blacklist_persists_and_updates_memory() {
        let mock = Arc::new(MockPlatform::new("T1", "UBOT"));
        mock.seed_channel(ChannelInfo {
            id: "CSTAFF".into(),
            name: "staff".into(),
            members: vec!["UBOT".into()],
            is_im: false,
            is_mpim: false,
        });
        let mut bot = new_bot("CSTAFF", mock.clone(), HashMap::new()).await;

        assert!(!bot.is_blacklisted("USLACKBOT"));
        bot.apply_cross_bot_blacklist("USLACKBOT").await;
        assert!(bot.is_blacklisted("USLACKBOT"));
    }
}

#[async_trait]
impl CommandContext for BotInstance {
    fn bot_name(&self) -> &str {
        &self.name
    }

    fn self_user_id(&self) -> &str {
        &self.self_user_id
    }

    fn workspace_id(&self) -> Option<&str> {
        self.workspace_id.as_deref()
    }

    fn staff_channel_id(&self) -> &str {
        &self.config.chan_id
    }

    fn lang(&self) -> &LangTable {
        &self.lang
    }

    fn threads_per_page(&self) -> u32 {
        self.config.threads_per_page
    }

    fn has_member(&self, user_id: &str) -> bool {
        self.staff_members.contains(user_id)
    }

    fn is_blacklisted(&self, user_id: &str) -> bool {
        self.blacklist.contains(user_id)
    }

    fn blacklist(&self) -> Vec<String> {
        self.blacklist.iter().cloned().collect()
    }

    fn active_sessions(&self) -> Vec<ActiveSessionSummary> {
        self.sessions
            .iter()
            .filter(|s| s.active)
            .map(|s| ActiveSessionSummary {
                participants: s.participants.clone(),
                thread_id: s.thread_id.clone(),
                dm_channel_id: s.dm_channel_id.clone(),
                updated_at: s.updated_at.clone(),
            })
            .collect()
    }

    async fn user_info(&self, user_id: &str) -> Result<UserInfo> {
        self.cached_user_info(user_id).await
    }

    async fn add_blacklist(&mut self, user_id: &str) -> Result<()> {
        self.store.add_blacklist(&self.name, user_id)?;
        self.blacklist.insert(user_id.to_string());
        self.deactivate_user(user_id).await;
        Ok(())
    }

    async fn remove_blacklist(&mut self, user_id: &str) -> Result<()> {
        self.store.remove_blacklist(&self.name, user_id)?;
        self.blacklist.remove(user_id);
        Ok(())
    }

    async fn invite(&mut self, user_ids: &[String]) -> Result<()> {
        for id in user_ids {
            if !self.invited.contains(id) {
                self.store.add_invited(&self.name, id)?;
                self.invited.push(id.clone());
            }
        }
        self.platform.invite_to_channel(&self.config.chan_id, user_ids).await
    }

    async fn close_matching(&mut self, mention_ids: &[String], thread_ts: Option<&str>) -> Result<bool> {
        let idx = if !mention_ids.is_empty() {
            let key = Session::participants_key(mention_ids);
            self.session_idx_by_participants(&key)
        } else if let Some(ts) = thread_ts {
            self.session_idx_by_ts(ts)
        } else {
            None
        };
        let Some(idx) = idx else {
            return Ok(false);
        };
        let ctx = build_ctx!(self);
        self.sessions[idx].expire(&ctx).await?;
        Ok(true)
    }

    /// Always forks a new thread, even over an already-active session for
    /// the same participants (decided open question, see DESIGN.md). When
    /// such a session is currently tracked for this dm, it's handed to
    /// `create` as the switched-from session so the context-switch notice
    /// fires and the superseded row gets deactivated.
    async fn contact(&mut self, participant_ids: &[String]) -> Result<()> {
        let dm_id = self.platform.open_dm(participant_ids).await?;
        let current_active_for_dm = self.session_idx_by_dm(&dm_id).map(|idx| self.sessions[idx].clone());
        let ctx = build_ctx!(self);
        let session = Initiator::new(&ctx, self.name.clone())
            .post_new_thread(&dm_id, participant_ids)
            .await
            .create(current_active_for_dm)
            .await?;
        self.sync_active_flags(&session);
        self.sessions.push(session);
        Ok(())
    }

    async fn resume(&mut self, mention_ids: &[String], thread_ts: Option<&str>) -> Result<bool> {
        let resolved_thread_id = if let Some(ts) = thread_ts {
            ts.to_string()
        } else if !mention_ids.is_empty() {
            let key = Session::participants_key(mention_ids);
            let page = self.store.history(&self.name, Some(&key), 0, 1)?;
            match page.sessions.first() {
                Some(s) => s.thread_id.clone(),
                None => return Ok(false),
            }
        } else {
            return Ok(false);
        };

        let staff = self.staff_members.clone();
        let blacklist = self.blacklist.clone();
        let is_not_allowed = move |id: &str| staff.contains(id) || blacklist.contains(id);

        let ctx = build_ctx!(self);
        let initiator = Initiator::new(&ctx, self.name.clone())
            .load_from(&resolved_thread_id, is_not_allowed)
            .await
            .post_new_thread("", &[])
            .await;

        match initiator.create(None).await {
            Ok(session) => {
                self.sync_active_flags(&session);
                self.sessions.push(session);
                Ok(true)
            }
            Err(RelayError::NotFound(_)) | Err(RelayError::UserNotAllowed) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn history_page(&self, participants: Option<&str>, page: u32) -> Result<HistoryPage> {
        self.store
            .history(&self.name, participants, page, self.config.threads_per_page)
    }

    fn logs_for(&self, mention_ids: &[String], thread_ts: Option<&str>, merged: bool) -> Option<String> {
        let stored = if let Some(ts) = thread_ts {
            self.store.find_by_thread(&self.name, ts).ok().flatten()
        } else if !mention_ids.is_empty() {
            let key = Session::participants_key(mention_ids);
            self.store
                .find_latest_by_participants(&self.name, &key)
                .ok()
                .flatten()
                .or_else(|| {
                    self.store
                        .history(&self.name, Some(&key), 0, 1)
                        .ok()
                        .and_then(|p| p.sessions.into_iter().next())
                        .and_then(|s| self.store.find_by_thread(&self.name, &s.thread_id).ok().flatten())
                })
        } else {
            None
        }?;

        let lines: Vec<String> = stored
            .messages
            .iter()
            .filter(|m| merged || m.original)
            .map(|m| format!("{}: {}", m.author_id, m.text))
            .collect();
        Some(lines.join("\n"))
    }

    async fn post_reply(&self, channel_id: &str, thread_ts: Option<&str>, text: &str) -> Result<()> {
        self.platform
            .post_message(PostMessage {
                channel_id: channel_id.to_string(),
                thread_ts: thread_ts.map(str::to_string),
                text: text.to_string(),
            })
            .await?;
        Ok(())
    }
}
