use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relay_core::config::BotConfig;
use relay_core::{RelayError, Result};
use relay_platform::PlatformClient;
use relay_store::Store;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use relay_bot::{BotInstance, RetryingPlatform};
use relay_commands::{CommandContext, CommandRegistry, SupervisorContext};

/// The platform's own built-in bot user, present in every workspace —
/// never a mirror target, so every bot's blacklist carries it from the
/// start (spec.md §4.4 invariant 5).
const PLATFORM_SELF_BOT_ID: &str = "USLACKBOT";

/// How long `reload` waits after a bot's loop has shut down before `load`
/// replaces the entry, so in-flight server-side delivery settles — spec.md
/// §5.
const RELOAD_SETTLE_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

/// Constructs the concrete [`PlatformClient`] a freshly loaded bot should
/// use, given its name and config. The registry never hardcodes a vendor
/// SDK (spec.md §1's external collaborator boundary) — the caller supplies
/// this, typically backed by `relay_platform::MockPlatform` in the bundled
/// binary.
pub type PlatformFactory =
    Arc<dyn Fn(&str, &BotConfig) -> Arc<dyn PlatformClient> + Send + Sync>;

struct BotHandle {
    platform: Arc<dyn PlatformClient>,
    workspace_id: Option<String>,
    self_user_id: String,
    connected_at: DateTime<Utc>,
    shutdown_tx: watch::Sender<bool>,
    blacklist_tx: mpsc::Sender<String>,
    reload: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Process-wide concurrent map of bot name to running instance — spec.md
/// §5 (C6). Grounded on `skynet-channels::manager::ChannelManager`,
/// generalised from a single-writer `HashMap` to `dashmap::DashMap` because
/// the registry, unlike a bot's own state, is mutated from multiple
/// callers at once (command handlers, the admin CLI, startup).
///
/// Implements [`SupervisorContext`] on itself; every [`BotInstance`] it
/// spawns is handed an `Arc<dyn SupervisorContext>` pointing back at this
/// same registry, so `!load`/`!unload`/`!reload`/`!uptime` commands issued
/// from any one bot operate on the whole fleet.
pub struct Registry {
    bots: DashMap<String, BotHandle>,
    store: Arc<dyn Store>,
    config_dir: PathBuf,
    command_registry: Arc<CommandRegistry>,
    platform_factory: PlatformFactory,
    self_weak: Weak<Registry>,
}

impl Registry {
    pub fn new(store: Arc<dyn Store>, config_dir: PathBuf, platform_factory: PlatformFactory) -> Arc<Self> {
        Arc::new_cyclic(|weak| Registry {
            bots: DashMap::new(),
            store,
            config_dir,
            command_registry: Arc::new(CommandRegistry::with_defaults()),
            platform_factory,
            self_weak: weak.clone(),
        })
    }

    pub fn bot_count(&self) -> usize {
        self.bots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    /// Names of every currently loaded bot, for a caller that wants to
    /// sweep the whole fleet (e.g. an orderly shutdown).
    pub fn names(&self) -> Vec<String> {
        self.bots.iter().map(|e| e.key().clone()).collect()
    }

    /// Read and connect a bot from `<config_dir>/<name>.json`. Rejects
    /// disabled or unparsable config; idempotent if already loaded —
    /// spec.md §5.
    pub async fn load(&self, name: &str) -> Result<()> {
        if self.bots.contains_key(name) {
            return Ok(());
        }
        let path = self.config_dir.join(format!("{name}.json"));
        let config = BotConfig::load_file(&path, name)?;
        if !config.enabled {
            info!(bot = name, "config disabled, not loading");
            return Ok(());
        }
        self.spawn_bot(name.to_string(), config).await
    }

    async fn spawn_bot(&self, name: String, config: BotConfig) -> Result<()> {
        let registry = self
            .self_weak
            .upgrade()
            .expect("registry dropped while one of its own bots was loading");
        let supervisor: Arc<dyn SupervisorContext> = registry.clone();

        let raw_platform = (self.platform_factory)(&name, &config);
        let platform: Arc<dyn PlatformClient> = Arc::new(RetryingPlatform::new(raw_platform.clone()));

        let bot = BotInstance::new(name.clone(), config, platform, self.store.clone(), supervisor)
            .connect()
            .await?;

        let workspace_id = bot.workspace_id().map(str::to_string);
        let self_user_id = bot.self_user_id().to_string();
        let connected_at = Utc::now();

        let (blacklist_tx, blacklist_rx) = mpsc::channel::<String>(32);
        let _ = blacklist_tx.send(PLATFORM_SELF_BOT_ID.to_string()).await;

        // Cross-bot blacklist bootstrap (spec.md §4.4 / invariant 5): wire
        // this bot and every sibling already in the same workspace onto
        // each other's blacklist channel. Collected before any `.await` so
        // no shard guard is held across a suspension point.
        let siblings: Vec<(String, mpsc::Sender<String>)> = self
            .bots
            .iter()
            .filter(|e| workspace_id.is_some() && e.value().workspace_id == workspace_id)
            .map(|e| (e.value().self_user_id.clone(), e.value().blacklist_tx.clone()))
            .collect();
        for (sibling_user_id, sibling_tx) in siblings {
            let _ = sibling_tx.send(self_user_id.clone()).await;
            let _ = blacklist_tx.send(sibling_user_id).await;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reload_flag = Arc::new(AtomicBool::new(false));
        let reload_for_task = reload_flag.clone();
        let registry_for_cleanup = registry.clone();
        let task_name = name.clone();
        let command_registry = self.command_registry.clone();

        let task = tokio::spawn(async move {
            relay_bot::events::run(bot, command_registry, blacklist_rx, shutdown_rx).await;
            if !reload_for_task.load(Ordering::SeqCst) {
                registry_for_cleanup.bots.remove(&task_name);
            }
        });

        self.bots.insert(
            name,
            BotHandle {
                platform: raw_platform,
                workspace_id,
                self_user_id,
                connected_at,
                shutdown_tx,
                blacklist_tx,
                reload: reload_flag,
                task,
            },
        );
        Ok(())
    }

    /// Disconnect a running bot and let its event loop wind down. The
    /// registry entry is removed by the loop's own cleanup once the loop
    /// exits (unless a `reload` is in flight for the same name) — spec.md
    /// §5.
    pub async fn unload(&self, name: &str) -> Result<()> {
        // Clone what's needed and drop the shard guard before awaiting —
        // never hold a `DashMap` guard across a suspension point.
        let (platform, shutdown_tx) = {
            let handle = self
                .bots
                .get(name)
                .ok_or_else(|| RelayError::NotFound(name.to_string()))?;
            (handle.platform.clone(), handle.shutdown_tx.clone())
        };
        let _ = platform.disconnect().await;
        let _ = shutdown_tx.send(true);
        Ok(())
    }

    /// Disconnect, wait for the loop to actually stop, pause briefly for
    /// server-side delivery to settle, then reload from disk — spec.md §5.
    pub async fn reload(&self, name: &str) -> Result<()> {
        let (platform, shutdown_tx) = {
            let handle = self
                .bots
                .get(name)
                .ok_or_else(|| RelayError::NotFound(name.to_string()))?;
            handle.reload.store(true, Ordering::SeqCst);
            (handle.platform.clone(), handle.shutdown_tx.clone())
        };
        let _ = platform.disconnect().await;
        let _ = shutdown_tx.send(true);

        if let Some((_, handle)) = self.bots.remove(name) {
            let _ = handle.task.await;
        }

        tokio::time::sleep(RELOAD_SETTLE_DELAY).await;

        let path = self.config_dir.join(format!("{name}.json"));
        let config = BotConfig::load_file(&path, name)?;
        if config.enabled {
            self.spawn_bot(name.to_string(), config).await?;
        } else {
            warn!(bot = name, "reload found config disabled, leaving unloaded");
        }
        Ok(())
    }
}

#[async_trait]
impl SupervisorContext for Registry {
    async fn load(&self, name: &str) -> Result<()> {
        self.load(name).await
    }

    async fn unload(&self, name: &str) -> Result<()> {
        self.unload(name).await
    }

    async fn reload(&self, name: &str) -> Result<()> {
        self.reload(name).await
    }

    fn uptimes(&self, caller_workspace: Option<&str>) -> Vec<(String, Option<String>, u64)> {
        self.bots
            .iter()
            .map(|entry| {
                let name = entry.key().clone();
                let handle = entry.value();
                let secs = (Utc::now() - handle.connected_at).num_seconds().max(0) as u64;
                let workspace = match (handle.workspace_id.as_deref(), caller_workspace) {
                    (Some(w), Some(c)) if w == c => Some(w.to_string()),
                    _ => None,
                };
                (name, workspace, secs)
            })
            .collect()
    }
}
