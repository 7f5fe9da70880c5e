use std::sync::Arc;

use relay_commands::CommandRegistry;
use relay_platform::PlatformEvent;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::instance::BotInstance;

/// Drive one bot's event loop until told to shut down — spec.md §4.4. Four
/// producers feed a single consumer: the platform's realtime stream, a
/// scrub ticker, a cross-bot blacklist channel, and a shutdown signal.
/// Grounded on `skynet-scheduler::engine::SchedulerEngine::run`'s
/// `tokio::select!` shape, generalised from two arms to four.
pub async fn run(
    mut bot: BotInstance,
    registry: Arc<CommandRegistry>,
    mut blacklist_rx: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let Some(mut events) = bot.platform().take_event_receiver() else {
        warn!(bot = bot.name(), "platform event receiver already taken; bot cannot run");
        return;
    };

    let mut ticker = tokio::time::interval(bot.timeout_check_interval());
    ticker.tick().await; // interval fires immediately on creation; skip it

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => dispatch_platform_event(&mut bot, event, &registry).await,
                    None => {
                        warn!(bot = bot.name(), "platform event stream closed");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                bot.scrub().await;
            }
            Some(user_id) = blacklist_rx.recv() => {
                bot.apply_cross_bot_blacklist(&user_id).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(bot = bot.name(), "shutdown requested");
                    break;
                }
            }
        }
    }
}

async fn dispatch_platform_event(bot: &mut BotInstance, event: PlatformEvent, registry: &CommandRegistry) {
    match event {
        PlatformEvent::Message(m) => bot.handle_message(m, registry).await,
        PlatformEvent::MessageEdited(e) => bot.handle_message_edited(e).await,
        PlatformEvent::ReactionAdded(r) => bot.handle_reaction(r, false).await,
        PlatformEvent::ReactionRemoved(r) => bot.handle_reaction(r, true).await,
        PlatformEvent::MemberJoinedChannel(m) => bot.handle_member_joined(m).await,
        PlatformEvent::MemberLeftChannel(m) => bot.handle_member_left(m).await,
        PlatformEvent::UserTyping(m) => bot.handle_user_typing(m).await,
        PlatformEvent::ChannelJoined { channel_id } | PlatformEvent::GroupJoined { channel_id } => {
            bot.handle_channel_joined(channel_id).await;
        }
        PlatformEvent::Connected(_) => {
            info!(bot = bot.name(), "reconnected");
        }
        PlatformEvent::Disconnected { intentional } => {
            if !intentional {
                warn!(bot = bot.name(), "unexpectedly disconnected");
            }
        }
        PlatformEvent::InvalidAuth => {
            warn!(bot = bot.name(), "invalid auth reported by platform");
        }
        PlatformEvent::RateLimited { retry_after_secs } => {
            warn!(bot = bot.name(), retry_after_secs, "rate limited");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use relay_commands::SupervisorContext;
    use relay_core::config::BotConfig;
    use relay_core::Result;
    use relay_platform::MockPlatform;
    use relay_store::{SqliteStore, Store};

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

    fn test_config() -> BotConfig {
        BotConfig {
            token: "xoxb-test".into(),
            chan_id: "CSTAFF".into(),
            enabled: true,
            max_file_size: 5_000_000,
            session_timeout_secs: 3600,
            timeout_check_interval_secs: 3600,
            threads_per_page: 10,
            allow_commands_in_channel: false,
            lang: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn shutdown_signal_ends_the_loop() {
        let mock = std::sync::Arc::new(MockPlatform::new("T1", "UBOT"));
        let store: std::sync::Arc<dyn Store> = std::sync::Arc::new(SqliteStore::open(":memory:").unwrap());
        let supervisor: std::sync::Arc<dyn SupervisorContext> = std::sync::Arc::new(NoopSupervisor);
        let platform = mock.clone();
        let bot = BotInstance::new("acme".into(), test_config(), platform, store, supervisor)
            .connect()
            .await
            .unwrap();

        let (_blacklist_tx, blacklist_rx) = tokio::sync::mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let registry = std::sync::Arc::new(CommandRegistry::with_defaults());

        shutdown_tx.send(true).unwrap();

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            run(bot, registry, blacklist_rx, shutdown_rx),
        )
        .await;

        assert!(result.is_ok(), "event loop did not exit after a shutdown signal");
    }
}
