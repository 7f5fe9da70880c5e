use std::collections::HashMap;

use async_trait::async_trait;
use relay_core::Result;

use crate::context::{CommandContext, SupervisorContext};

/// Arguments a command handler is invoked with — the text has already been
/// split into a command name (used to look the handler up) and these args.
#[derive(Debug, Clone)]
pub struct CmdParams {
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub user_id: String,
    pub args: Vec<String>,
}

/// The three reactions a command invocation can receive (spec.md §4.5).
/// `Unknown` is never returned by a handler — the registry produces it when
/// no handler is registered for the parsed name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    Failure,
    Unknown,
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn run(
        &self,
        ctx: &mut dyn CommandContext,
        supervisor: Option<&dyn SupervisorContext>,
        params: &CmdParams,
    ) -> Result<bool>;
}

/// Exact-name registry + dispatcher, generalised from a priority/predicate
/// hook engine down to simple name lookup (spec.md §4.5 names commands by
/// exact, case-insensitive identifier — no ordering or timing concerns).
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Box<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, handler: Box<dyn CommandHandler>) {
        self.handlers.insert(name.to_lowercase(), handler);
    }

    pub async fn dispatch(
        &self,
        name: &str,
        ctx: &mut dyn CommandContext,
        supervisor: Option<&dyn SupervisorContext>,
        params: &CmdParams,
    ) -> CommandOutcome {
        let Some(handler) = self.handlers.get(&name.to_lowercase()) else {
            return CommandOutcome::Unknown;
        };
        match handler.run(ctx, supervisor, params).await {
            Ok(true) => CommandOutcome::Success,
            Ok(false) => CommandOutcome::Failure,
            Err(e) => {
                tracing::warn!(command = name, error = %e, "command handler returned an error");
                CommandOutcome::Failure
            }
        }
    }

    /// Register all thirteen commands from spec.md §4.5 with their default handlers.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register("active", Box::new(crate::handlers::ActiveHandler));
        reg.register("blacklist", Box::new(crate::handlers::BlacklistHandler));
        reg.register("close", Box::new(crate::handlers::CloseHandler));
        reg.register("contact", Box::new(crate::handlers::ContactHandler));
        reg.register("help", Box::new(crate::handlers::HelpHandler));
        reg.register("history", Box::new(crate::handlers::HistoryHandler));
        reg.register("invite", Box::new(crate::handlers::InviteHandler));
        reg.register("load", Box::new(crate::handlers::LoadHandler));
        reg.register("logs", Box::new(crate::handlers::LogsHandler));
        reg.register("reload", Box::new(crate::handlers::ReloadHandler));
        reg.register("resume", Box::new(crate::handlers::ResumeHandler));
        reg.register("unload", Box::new(crate::handlers::UnloadHandler));
        reg.register("uptime", Box::new(crate::handlers::UptimeHandler));
        reg
    }
}
