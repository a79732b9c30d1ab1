//! Command handlers for the control bot.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gateway_core::{format_uptime, split_message, CHUNK_DELAY_MS, MAX_MESSAGE_LENGTH};
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode, Recipient, UserId};
use teloxide::utils::command::BotCommands;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::onboarding::{CredentialUpload, OnboardingInput, OnboardingReply, OnboardingStep};
use crate::session::{SessionHealth, SessionPhase};
use crate::state::SessionManager;

/// Reply sent when a handler fails unexpectedly.
pub const GENERIC_FAILURE: &str = "Something went wrong while handling that request. Please try again.";

/// Bot commands that can be invoked with /.
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Start the bot and get help")]
    Start,

    #[command(description = "Show help message")]
    Help,

    #[command(description = "Connect your Telegram account")]
    Connect,

    #[command(description = "Cancel the connection process")]
    Cancel,

    #[command(description = "Replace your current connection")]
    Replace,

    #[command(description = "Delete your connection")]
    Delete,

    #[command(description = "Check your connection status")]
    Health,

    #[command(description = "Admin: pause userbot responses")]
    Pause,

    #[command(description = "Admin: resume userbot responses")]
    Restart,

    #[command(description = "Admin: gateway statistics")]
    Stats,

    #[command(description = "Admin: install a plugin (reply to a <name>.plugin file)")]
    Upload,

    #[command(description = "Admin: reload plugins in every session")]
    Reload,

    #[command(description = "Admin: remove a plugin: /remove <name>")]
    Remove(String),
}

impl Command {
    /// Commands limited to `ADMIN_IDS`.
    pub fn is_privileged(&self) -> bool {
        matches!(
            self,
            Command::Pause
                | Command::Restart
                | Command::Stats
                | Command::Upload
                | Command::Reload
                | Command::Remove(_)
        )
    }
}

/// Send `text`, split into chunks that fit one Telegram message.
pub async fn send_long_message(bot: &Bot, chat_id: ChatId, text: &str) -> ResponseResult<()> {
    for (i, chunk) in split_message(text, MAX_MESSAGE_LENGTH).iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(CHUNK_DELAY_MS)).await;
        }
        bot.send_message(chat_id, chunk).await?;
    }
    Ok(())
}

fn join_channel_text(channel: &str) -> String {
    format!(
        "<b>Access Required</b>\n\n\
        To use this bot, you must first join our channel:\n\
        {}\n\n\
        After joining, send your command again.",
        html_escape(channel)
    )
}

fn channel_recipient(channel: &str) -> Recipient {
    match channel.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => Recipient::ChannelUsername(channel.to_string()),
    }
}

/// Whether the user is a member of the required channel. Always true when
/// no channel is configured.
pub async fn is_channel_member(bot: &Bot, manager: &SessionManager, user: UserId) -> bool {
    let Some(channel) = manager.settings().force_join_channel.as_deref() else {
        return true;
    };
    match bot.get_chat_member(channel_recipient(channel), user).await {
        Ok(member) => member.kind.is_present(),
        Err(e) => {
            warn!(user_id = %user, channel = %channel, error = %e, "Membership check failed");
            false
        }
    }
}

/// Run the access gates shared by every handler.
///
/// Returns the caller's user id when the message may be processed. Messages
/// outside private chats are ignored silently; non-members get the fixed
/// join message.
async fn pass_gates(bot: &Bot, msg: &Message, manager: &SessionManager) -> ResponseResult<Option<i64>> {
    if !msg.chat.is_private() {
        debug!(chat_id = %msg.chat.id, "Ignoring message outside a private chat");
        return Ok(None);
    }
    let Some(user) = msg.from.as_ref() else {
        return Ok(None);
    };
    if !is_channel_member(bot, manager, user.id).await {
        if let Some(channel) = manager.settings().force_join_channel.as_deref() {
            bot.send_message(msg.chat.id, join_channel_text(channel))
                .parse_mode(ParseMode::Html)
                .await?;
        }
        return Ok(None);
    }
    Ok(Some(user.id.0 as i64))
}

/// Handle the /start command.
pub async fn handle_start(bot: Bot, msg: Message, manager: Arc<SessionManager>) -> ResponseResult<()> {
    let welcome = format!(
        "<b>Multi-Session UserBot</b>\n\n\
        <b>Available Commands:</b>\n\
        /connect - Connect your Telegram account\n\
        /replace - Replace your current session\n\
        /delete - Delete your connection\n\
        /health - Check your connection status\n\
        /pause, /restart - Pause or resume bot responses (admin)\n\n\
        <b>Features:</b>\n\
        Send <code>!ping</code> from your account to get a <code>pong</code> response.\n\
        Plugins loaded: {}\n\n\
        This bot only works in private messages.",
        manager.plugins().catalog().list().join(", ")
    );

    bot.send_message(msg.chat.id, welcome)
        .parse_mode(ParseMode::Html)
        .await?;

    info!(chat_id = %msg.chat.id, user = ?msg.from.as_ref().map(|u| &u.username), "User started bot");
    Ok(())
}

/// Handle the /help command.
pub async fn handle_help(bot: Bot, msg: Message, manager: Arc<SessionManager>) -> ResponseResult<()> {
    let mut help = Command::descriptions().to_string();
    help.push_str("\n\nUserbot commands (send from your own account):\n!ping - liveness check\n");
    let catalog = manager.plugins().catalog();
    for name in catalog.list() {
        if let Some(plugin) = catalog.get(name) {
            let info = plugin.info();
            help.push_str(&format!("{} - {}\n", info.commands.join(", "), info.description));
        }
    }
    send_long_message(&bot, msg.chat.id, &help).await
}

/// Handle the /connect command.
pub async fn handle_connect(bot: Bot, msg: Message, manager: Arc<SessionManager>, user_id: i64) -> ResponseResult<()> {
    let reply = match manager.begin_onboarding(user_id).await {
        Ok(()) => OnboardingStep::AwaitingId.prompt().to_string(),
        Err(e) => e.to_string(),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Handle the /cancel command.
pub async fn handle_cancel(bot: Bot, msg: Message, manager: Arc<SessionManager>, user_id: i64) -> ResponseResult<()> {
    let reply = match manager.cancel_onboarding(user_id).await {
        Ok(()) => "Connection process cancelled.".to_string(),
        Err(e) => e.to_string(),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Handle the /replace command.
pub async fn handle_replace(bot: Bot, msg: Message, manager: Arc<SessionManager>, user_id: i64) -> ResponseResult<()> {
    let reply = match manager.replace(user_id).await {
        Ok(()) => format!(
            "Replacing your connection...\n\n{}",
            OnboardingStep::AwaitingId.prompt()
        ),
        Err(SessionError::NoSession) => {
            "You don't have any connection to replace. Use /connect first.".to_string()
        }
        Err(e) => e.to_string(),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Handle the /delete command.
pub async fn handle_delete(bot: Bot, msg: Message, manager: Arc<SessionManager>, user_id: i64) -> ResponseResult<()> {
    let reply = match manager.delete(user_id).await {
        Ok(()) => "Your connection has been deleted successfully!".to_string(),
        Err(SessionError::NoSession) => "You don't have any connection to delete.".to_string(),
        Err(e) => e.to_string(),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Render a `/health` report.
pub fn format_health(health: &SessionHealth, paused: bool) -> String {
    let active = health.phase == SessionPhase::Active;
    let account = health
        .account
        .as_ref()
        .map(|a| format!("{} ({})", a.display_name(), a.id))
        .unwrap_or_else(|| "unknown".to_string());
    let ping = match health.last_liveness {
        Some(at) => format!("Last ping: {}s ago", (Utc::now() - at).num_seconds().max(0)),
        None => "No ping sent yet".to_string(),
    };
    let plugins = if health.plugins.is_empty() {
        "none".to_string()
    } else {
        health.plugins.join(", ")
    };

    format!(
        "Connection Status: {}\n\n\
        Account: {}\n\
        API ID: {}\n\n\
        Connection: {}\n\
        Bot Status: {}\n\
        {}\n\
        Plugins: {}\n\n\
        Send !ping from your account to test the response.",
        if active { "Healthy" } else { "Inactive" },
        account,
        health.api_id,
        if active { "Active" } else { "Inactive" },
        if paused { "Paused" } else { "Active" },
        ping,
        plugins,
    )
}

/// Handle the /health command.
pub async fn handle_health(bot: Bot, msg: Message, manager: Arc<SessionManager>, user_id: i64) -> ResponseResult<()> {
    let reply = match manager.health(user_id).await {
        Ok(health) => format_health(&health, manager.status().is_paused()),
        Err(SessionError::NoSession) => SessionError::NoSession.to_string(),
        Err(e) => format!("Connection failed: {}", e),
    };
    send_long_message(&bot, msg.chat.id, &reply).await
}

/// Handle the /pause command.
pub async fn handle_pause(bot: Bot, msg: Message, manager: Arc<SessionManager>) -> ResponseResult<()> {
    manager.pause();
    bot.send_message(
        msg.chat.id,
        "Bot Paused\n\nAll userbot responses have been paused. Use /restart to resume.",
    )
    .await?;
    Ok(())
}

/// Handle the /restart command.
pub async fn handle_restart(bot: Bot, msg: Message, manager: Arc<SessionManager>) -> ResponseResult<()> {
    manager.resume();
    bot.send_message(msg.chat.id, "Bot Restarted\n\nAll userbot responses have been resumed!")
        .await?;
    Ok(())
}

/// Handle the /stats command.
pub async fn handle_stats(bot: Bot, msg: Message, manager: Arc<SessionManager>) -> ResponseResult<()> {
    let stats = manager.stats().await;
    let units = if stats.plugin_units.is_empty() {
        "none".to_string()
    } else {
        stats.plugin_units.join(", ")
    };
    let text = format!(
        "Gateway statistics\n\n\
        Registered sessions: {}\n\
        Active sessions: {}\n\
        Onboarding: {}\n\
        Uptime: {}\n\
        Paused: {}\n\
        Plugin units: {}",
        stats.registered_sessions,
        stats.active_sessions,
        stats.onboarding,
        format_uptime(stats.uptime),
        if stats.paused { "yes" } else { "no" },
        units,
    );
    send_long_message(&bot, msg.chat.id, &text).await
}

/// Download a Telegram document into memory.
async fn download_document(bot: &Bot, file_id: &str) -> Result<Vec<u8>, SessionError> {
    let file = bot
        .get_file(file_id.to_string())
        .await
        .map_err(|e| SessionError::Download(e.to_string()))?;
    let mut bytes = Vec::new();
    bot.download_file(&file.path, &mut bytes)
        .await
        .map_err(|e| SessionError::Download(e.to_string()))?;
    Ok(bytes)
}

/// Handle the /upload command, sent as a reply to a plugin unit file.
pub async fn handle_upload(bot: Bot, msg: Message, manager: Arc<SessionManager>) -> ResponseResult<()> {
    let Some(doc) = msg.reply_to_message().and_then(|m| m.document()) else {
        bot.send_message(msg.chat.id, "Reply to a <name>.plugin file with /upload.")
            .await?;
        return Ok(());
    };
    let file_name = doc.file_name.clone().unwrap_or_default();

    let reply = match download_document(&bot, &doc.file.id).await {
        Ok(bytes) => match manager.install_plugin(&file_name, &bytes).await {
            Ok(report) => {
                let mut text = format!(
                    "Plugin {} installed and loaded into {} session(s).",
                    report.name,
                    report.loaded.len()
                );
                for (user_id, reason) in &report.failed {
                    text.push_str(&format!("\nFailed for {}: {}", user_id, reason));
                }
                text
            }
            Err(e) => format!("Upload failed: {}", e),
        },
        Err(e) => format!("Upload failed: {}", e),
    };
    send_long_message(&bot, msg.chat.id, &reply).await
}

/// Handle the /reload command.
pub async fn handle_reload(bot: Bot, msg: Message, manager: Arc<SessionManager>) -> ResponseResult<()> {
    let reports = manager.reload_plugins().await;
    let mut text = format!("Reloaded plugins in {} session(s).", reports.len());
    for (user_id, report) in &reports {
        if !report.failed.is_empty() {
            let names: Vec<&str> = report.failed.iter().map(|(n, _)| n.as_str()).collect();
            text.push_str(&format!("\n{}: failed {}", user_id, names.join(", ")));
        }
    }
    send_long_message(&bot, msg.chat.id, &text).await
}

/// Handle the /remove command.
pub async fn handle_remove(bot: Bot, msg: Message, manager: Arc<SessionManager>, name: String) -> ResponseResult<()> {
    let name = name.trim().trim_end_matches(".plugin");
    if name.is_empty() {
        bot.send_message(msg.chat.id, "Usage: /remove <name>").await?;
        return Ok(());
    }

    let reply = match manager.remove_plugin(name).await {
        Ok(report) if !report.file_removed && report.unloaded == 0 => {
            format!("Plugin {} is not installed.", name)
        }
        Ok(report) => format!(
            "Plugin {} removed from {} session(s).",
            name, report.unloaded
        ),
        Err(e) => format!("Remove failed: {}", e),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Main command dispatcher.
pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    manager: Arc<SessionManager>,
) -> ResponseResult<()> {
    let Some(user_id) = pass_gates(&bot, &msg, &manager).await? else {
        return Ok(());
    };

    if let Err(e) = manager.authorize(user_id, cmd.is_privileged()) {
        info!(user_id, command = ?cmd, "Privileged command denied");
        bot.send_message(msg.chat.id, e.to_string()).await?;
        return Ok(());
    }

    debug!(user_id, command = ?cmd, "Handling command");
    match cmd {
        Command::Start => handle_start(bot, msg, manager).await,
        Command::Help => handle_help(bot, msg, manager).await,
        Command::Connect => handle_connect(bot, msg, manager, user_id).await,
        Command::Cancel => handle_cancel(bot, msg, manager, user_id).await,
        Command::Replace => handle_replace(bot, msg, manager, user_id).await,
        Command::Delete => handle_delete(bot, msg, manager, user_id).await,
        Command::Health => handle_health(bot, msg, manager, user_id).await,
        Command::Pause => handle_pause(bot, msg, manager).await,
        Command::Restart => handle_restart(bot, msg, manager).await,
        Command::Stats => handle_stats(bot, msg, manager).await,
        Command::Upload => handle_upload(bot, msg, manager).await,
        Command::Reload => handle_reload(bot, msg, manager).await,
        Command::Remove(name) => handle_remove(bot, msg, manager, name).await,
    }
}

/// A credential file sent to the bot, downloaded on demand.
pub struct TelegramUpload {
    bot: Bot,
    file_id: String,
    file_name: String,
}

#[async_trait]
impl CredentialUpload for TelegramUpload {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    async fn fetch(&self) -> crate::error::Result<Vec<u8>> {
        download_document(&self.bot, &self.file_id).await
    }
}

/// Text for an onboarding reply.
pub fn format_onboarding_reply(reply: &OnboardingReply) -> String {
    match reply {
        OnboardingReply::Prompt(step) => step.prompt().to_string(),
        OnboardingReply::Reprompt(step) => step.reprompt().to_string(),
        OnboardingReply::Connected { display_name } => format!(
            "UserBot Connected Successfully!\n\nConnected as: {}\n\nSend !ping from your account to get a pong response!",
            display_name
        ),
        OnboardingReply::Failed(e) => format!("Connection Failed: {}\n\nUse /connect to try again.", e),
        OnboardingReply::Expired => {
            "Your connection process expired. Use /connect to start again.".to_string()
        }
    }
}

/// Handle free text and documents (the onboarding conversation).
pub async fn handle_message(bot: Bot, msg: Message, manager: Arc<SessionManager>) -> ResponseResult<()> {
    let Some(user_id) = pass_gates(&bot, &msg, &manager).await? else {
        return Ok(());
    };
    // Expired flows still get routed so the user hears that they expired
    if !manager.has_onboarding_entry(user_id).await {
        debug!(user_id, "Ignoring message outside onboarding");
        return Ok(());
    }

    let input = if let Some(doc) = msg.document() {
        OnboardingInput::File(Box::new(TelegramUpload {
            bot: bot.clone(),
            file_id: doc.file.id.clone(),
            file_name: doc.file_name.clone().unwrap_or_default(),
        }))
    } else if let Some(text) = msg.text() {
        OnboardingInput::Text(text.to_string())
    } else {
        return Ok(());
    };

    let reply = match manager.advance_onboarding(user_id, input).await {
        Ok(reply) => format_onboarding_reply(&reply),
        Err(e) => e.to_string(),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Account;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/connect", "bot").unwrap(), Command::Connect);
        assert_eq!(
            Command::parse("/remove weather", "bot").unwrap(),
            Command::Remove("weather".to_string())
        );
        assert!(Command::parse("/unknown", "bot").is_err());
    }

    #[test]
    fn test_privileged_commands() {
        assert!(Command::Stats.is_privileged());
        assert!(Command::Remove(String::new()).is_privileged());
        assert!(Command::Pause.is_privileged());
        assert!(Command::Restart.is_privileged());
        assert!(!Command::Connect.is_privileged());
        assert!(!Command::Health.is_privileged());
    }

    #[test]
    fn test_channel_recipient() {
        assert_eq!(channel_recipient("-1001234"), Recipient::Id(ChatId(-1001234)));
        assert_eq!(
            channel_recipient("@news"),
            Recipient::ChannelUsername("@news".to_string())
        );
    }

    #[test]
    fn test_format_health() {
        let health = SessionHealth {
            user_id: 1,
            api_id: 12345,
            phase: SessionPhase::Active,
            account: Some(Account {
                id: 99,
                username: Some("alice".to_string()),
                first_name: "Alice".to_string(),
            }),
            last_liveness: None,
            plugins: vec!["joke".to_string()],
        };
        let text = format_health(&health, true);

        assert!(text.contains("Connection Status: Healthy"));
        assert!(text.contains("alice (99)"));
        assert!(text.contains("API ID: 12345"));
        assert!(text.contains("Bot Status: Paused"));
        assert!(text.contains("No ping sent yet"));
        assert!(text.contains("Plugins: joke"));
    }

    #[test]
    fn test_format_onboarding_reply() {
        assert_eq!(
            format_onboarding_reply(&OnboardingReply::Prompt(OnboardingStep::AwaitingHash)),
            "Please send your API Hash:"
        );
        let failed = format_onboarding_reply(&OnboardingReply::Failed(SessionError::CredentialInvalid));
        assert!(failed.contains("Session file is invalid or expired"));
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<a & b>"), "&lt;a &amp; b&gt;");
    }
}
