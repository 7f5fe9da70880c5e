use async_trait::async_trait;
use relay_core::lang::LangTable;
use relay_core::Result;
use relay_session::Session;

use crate::context::{CommandContext, SupervisorContext};
use crate::dispatch::{CmdParams, CommandHandler};
use crate::parser::mention_id;

/// Parse `args` as a run of mention tokens. Returns `None` (→ argument
/// rejection) if any token isn't a mention, is empty, or repeats.
fn mentions_only(args: &[String]) -> Option<Vec<String>> {
    let mut ids = Vec::with_capacity(args.len());
    for arg in args {
        let id = mention_id(arg);
        if id.is_empty() || ids.contains(&id) {
            return None;
        }
        ids.push(id);
    }
    Some(ids)
}

/// `!active` — list active sessions with their remaining lifetime.
pub struct ActiveHandler;

#[async_trait]
impl CommandHandler for ActiveHandler {
    async fn run(
        &self,
        ctx: &mut dyn CommandContext,
        _supervisor: Option<&dyn SupervisorContext>,
        params: &CmdParams,
    ) -> Result<bool> {
        let sessions = ctx.active_sessions();
        let lines: Vec<String> = sessions
            .iter()
            .map(|s| {
                let tagged: Vec<String> = s.participants.iter().map(|id| format!("<@{id}>")).collect();
                ctx.lang().render(
                    "cmdActiveLine",
                    &[
                        ("participants", &tagged.join(", ")),
                        ("thread", &s.thread_id),
                        ("updated_at", &s.updated_at),
                    ],
                )
            })
            .collect();
        let text = if lines.is_empty() {
            ctx.lang().render("cmdActiveEmpty", &[])
        } else {
            lines.join("\n")
        };
        ctx.post_reply(&params.channel_id, params.thread_id.as_deref(), &text)
            .await?;
        Ok(true)
    }
}

/// `!blacklist` — list, or add/remove users (`rm? <@u1>…`).
pub struct BlacklistHandler;

#[async_trait]
impl CommandHandler for BlacklistHandler {
    async fn run(
        &self,
        ctx: &mut dyn CommandContext,
        _supervisor: Option<&dyn SupervisorContext>,
        params: &CmdParams,
    ) -> Result<bool> {
        if params.args.is_empty() {
            let tagged: Vec<String> = ctx
                .blacklist()
                .iter()
                .map(|id| format!("<@{id}>"))
                .collect();
            let text = ctx
                .lang()
                .render("listBlacklisted", &[("users", &tagged.join(", "))]);
            ctx.post_reply(&params.channel_id, params.thread_id.as_deref(), &text)
                .await?;
            return Ok(true);
        }

        let mut args = params.args.as_slice();
        let removing = args[0].eq_ignore_ascii_case("rm");
        if removing {
            args = &args[1..];
            if args.is_empty() {
                return Ok(false);
            }
        }

        let Some(ids) = mentions_only(args) else {
            return Ok(false);
        };

        for id in &ids {
            if id == &params.user_id || id == ctx.self_user_id() {
                return Ok(false);
            }
            let listed = ctx.is_blacklisted(id);
            if (removing && !listed) || (!removing && listed) {
                return Ok(false);
            }
            if !removing {
                match ctx.user_info(id).await {
                    Ok(info) if info.is_bot => return Ok(false),
                    Ok(_) => {}
                    Err(_) => return Ok(false),
                }
                if ctx.has_member(id) {
                    return Ok(false);
                }
            }
        }

        for id in &ids {
            if removing {
                ctx.remove_blacklist(id).await?;
            } else {
                ctx.add_blacklist(id).await?;
            }
        }
        Ok(true)
    }
}

fn close_or_resume_target(args: &[String]) -> Option<(Vec<String>, Option<String>)> {
    if args.is_empty() {
        return None;
    }
    if let Some(ids) = mentions_only(args) {
        return Some((ids, None));
    }
    if args.len() == 1 {
        return Some((Vec::new(), Some(args[0].clone())));
    }
    None
}

/// `!close` — expire the matching session, named by mentions or thread ts.
pub struct CloseHandler;

#[async_trait]
impl CommandHandler for CloseHandler {
    async fn run(
        &self,
        ctx: &mut dyn CommandContext,
        _supervisor: Option<&dyn SupervisorContext>,
        params: &CmdParams,
    ) -> Result<bool> {
        let Some((ids, thread_ts)) = close_or_resume_target(&params.args) else {
            return Ok(false);
        };
        Ok(ctx.close_matching(&ids, thread_ts.as_deref()).await?)
    }
}

/// `!contact <@u1>…` — start (or fork onto) a session with the named outsiders.
pub struct ContactHandler;

#[async_trait]
impl CommandHandler for ContactHandler {
    async fn run(
        &self,
        ctx: &mut dyn CommandContext,
        _supervisor: Option<&dyn SupervisorContext>,
        params: &CmdParams,
    ) -> Result<bool> {
        let Some(ids) = mentions_only(&params.args) else {
            return Ok(false);
        };
        if ids.is_empty() {
            return Ok(false);
        }
        for id in &ids {
            if id == ctx.self_user_id() || ctx.is_blacklisted(id) || ctx.has_member(id) {
                return Ok(false);
            }
        }
        ctx.contact(&ids).await?;
        Ok(true)
    }
}

/// `!help` — general help, or help for one named command.
pub struct HelpHandler;

#[async_trait]
impl CommandHandler for HelpHandler {
    async fn run(
        &self,
        ctx: &mut dyn CommandContext,
        _supervisor: Option<&dyn SupervisorContext>,
        params: &CmdParams,
    ) -> Result<bool> {
        let text = match params.args.first() {
            Some(command) => ctx.lang().render(&LangTable::help_key_for(command), &[]),
            None => ctx.lang().render("cmdHelpHelp", &[]),
        };
        ctx.post_reply(&params.channel_id, params.thread_id.as_deref(), &text)
            .await?;
        Ok(true)
    }
}

/// `!history <@u…>? <page?>` — paginated listing of historical sessions.
pub struct HistoryHandler;

#[async_trait]
impl CommandHandler for HistoryHandler {
    async fn run(
        &self,
        ctx: &mut dyn CommandContext,
        _supervisor: Option<&dyn SupervisorContext>,
        params: &CmdParams,
    ) -> Result<bool> {
        let mut args = params.args.clone();
        let page = match args.last().and_then(|a| a.parse::<u32>().ok()) {
            Some(n) => {
                args.pop();
                n
            }
            None => 0,
        };
        let participants_key = if args.is_empty() {
            None
        } else {
            match mentions_only(&args) {
                Some(ids) => Some(Session::participants_key(&ids)),
                None => return Ok(false),
            }
        };

        let page_result = ctx.history_page(participants_key.as_deref(), page)?;
        let lines: Vec<String> = page_result
            .sessions
            .iter()
            .map(|s| {
                ctx.lang().render(
                    "cmdHistoryLine",
                    &[
                        ("participants", &s.participants),
                        ("thread", &s.thread_id),
                        ("updated_at", &s.updated_at),
                    ],
                )
            })
            .collect();
        let text = if lines.is_empty() {
            ctx.lang().render("cmdHistoryEmpty", &[])
        } else {
            lines.join("\n")
        };
        ctx.post_reply(&params.channel_id, params.thread_id.as_deref(), &text)
            .await?;
        Ok(true)
    }
}

/// `!invite <@u1>…` — queue invites and call the platform's invite.
pub struct InviteHandler;

#[async_trait]
impl CommandHandler for InviteHandler {
    async fn run(
        &self,
        ctx: &mut dyn CommandContext,
        _supervisor: Option<&dyn SupervisorContext>,
        params: &CmdParams,
    ) -> Result<bool> {
        let Some(ids) = mentions_only(&params.args) else {
            return Ok(false);
        };
        if ids.is_empty() {
            return Ok(false);
        }
        for id in &ids {
            if ctx.has_member(id) {
                return Ok(false);
            }
        }
        ctx.invite(&ids).await?;
        Ok(true)
    }
}

/// `!load <name>` — supervisor: instantiate a bot from its config file.
pub struct LoadHandler;

#[async_trait]
impl CommandHandler for LoadHandler {
    async fn run(
        &self,
        _ctx: &mut dyn CommandContext,
        supervisor: Option<&dyn SupervisorContext>,
        params: &CmdParams,
    ) -> Result<bool> {
        let Some(name) = params.args.first() else {
            return Ok(false);
        };
        let Some(supervisor) = supervisor else {
            return Ok(false);
        };
        supervisor.load(name).await?;
        Ok(true)
    }
}

/// `!logs -m? (<@u…> | <thread-ts>)` — merged-or-grouped text log.
pub struct LogsHandler;

#[async_trait]
impl CommandHandler for LogsHandler {
    async fn run(
        &self,
        ctx: &mut dyn CommandContext,
        _supervisor: Option<&dyn SupervisorContext>,
        params: &CmdParams,
    ) -> Result<bool> {
        let mut args = params.args.as_slice();
        let merged = args.first().map(|a| a == "-m").unwrap_or(false);
        if merged {
            args = &args[1..];
        }
        let Some((ids, thread_ts)) = close_or_resume_target(args) else {
            return Ok(false);
        };
        match ctx.logs_for(&ids, thread_ts.as_deref(), merged) {
            Some(text) => {
                ctx.post_reply(&params.channel_id, params.thread_id.as_deref(), &text)
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// `!reload` — supervisor: disconnect, reload config, reinstantiate.
pub struct ReloadHandler;

#[async_trait]
impl CommandHandler for ReloadHandler {
    async fn run(
        &self,
        ctx: &mut dyn CommandContext,
        supervisor: Option<&dyn SupervisorContext>,
        _params: &CmdParams,
    ) -> Result<bool> {
        let Some(supervisor) = supervisor else {
            return Ok(false);
        };
        supervisor.reload(ctx.bot_name()).await?;
        Ok(true)
    }
}

/// `!resume <@u…> | <thread-ts>` — resume the most recent matching session.
pub struct ResumeHandler;

#[async_trait]
impl CommandHandler for ResumeHandler {
    async fn run(
        &self,
        ctx: &mut dyn CommandContext,
        _supervisor: Option<&dyn SupervisorContext>,
        params: &CmdParams,
    ) -> Result<bool> {
        let Some((ids, thread_ts)) = close_or_resume_target(&params.args) else {
            return Ok(false);
        };
        Ok(ctx.resume(&ids, thread_ts.as_deref()).await?)
    }
}

/// `!unload <name>?` — supervisor: disconnect the named (or own) bot.
pub struct UnloadHandler;

#[async_trait]
impl CommandHandler for UnloadHandler {
    async fn run(
        &self,
        ctx: &mut dyn CommandContext,
        supervisor: Option<&dyn SupervisorContext>,
        params: &CmdParams,
    ) -> Result<bool> {
        let Some(supervisor) = supervisor else {
            return Ok(false);
        };
        let name = params.args.first().cloned().unwrap_or_else(|| ctx.bot_name().to_string());
        supervisor.unload(&name).await?;
        Ok(true)
    }
}

/// `!uptime` — list each loaded bot's uptime; cross-workspace bots shown
/// without a mention.
pub struct UptimeHandler;

#[async_trait]
impl CommandHandler for UptimeHandler {
    async fn run(
        &self,
        ctx: &mut dyn CommandContext,
        supervisor: Option<&dyn SupervisorContext>,
        params: &CmdParams,
    ) -> Result<bool> {
        let Some(supervisor) = supervisor else {
            return Ok(false);
        };
        let lines: Vec<String> = supervisor
            .uptimes(ctx.workspace_id())
            .iter()
            .map(|(name, user_id, secs)| match user_id {
                Some(id) => ctx.lang().render(
                    "cmdUptimeLine",
                    &[("name", name), ("user", id), ("seconds", &secs.to_string())],
                ),
                None => ctx.lang().render(
                    "cmdUptimeLineForeign",
                    &[("name", name), ("seconds", &secs.to_string())],
                ),
            })
            .collect();
        let text = lines.join("\n");
        ctx.post_reply(&params.channel_id, params.thread_id.as_deref(), &text)
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mentions_only_rejects_duplicates() {
        assert!(mentions_only(&["<@U1>".into(), "<@U1>".into()]).is_none());
    }

    #[test]
    fn mentions_only_rejects_non_mentions() {
        assert!(mentions_only(&["not-a-mention".into()]).is_none());
    }

    #[test]
    fn close_or_resume_target_prefers_mentions() {
        let (ids, ts) = close_or_resume_target(&["<@U1>".into(), "<@U2>".into()]).unwrap();
        assert_eq!(ids, vec!["U1".to_string(), "U2".to_string()]);
        assert!(ts.is_none());
    }

    #[test]
    fn close_or_resume_target_falls_back_to_single_thread_ts() {
        let (ids, ts) = close_or_resume_target(&["1700000000.000100".into()]).unwrap();
        assert!(ids.is_empty());
        assert_eq!(ts.unwrap(), "1700000000.000100");
    }
}
