//! Control bot wiring.

use std::sync::Arc;

use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use tracing::{error, info, warn};

use crate::error::{Result, SessionError};
use crate::handlers::{handle_command, handle_message, Command, GENERIC_FAILURE};
use crate::liveness;
use crate::state::SessionManager;

/// The control bot plus the sessions it manages.
pub struct GatewayBot {
    /// The teloxide bot instance.
    bot: Bot,
    /// Shared state across handlers.
    manager: Arc<SessionManager>,
    /// Port for the liveness endpoint; `None` disables it.
    health_port: Option<u16>,
}

impl GatewayBot {
    /// Create a bot from the token in the manager's settings.
    pub fn new(manager: Arc<SessionManager>, health_port: Option<u16>) -> Result<Self> {
        let token = manager
            .settings()
            .bot_token
            .clone()
            .ok_or(SessionError::NoToken)?;

        Ok(Self {
            bot: Bot::new(token),
            manager,
            health_port,
        })
    }

    /// Get the bot's username.
    pub async fn get_me(&self) -> Result<String> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| SessionError::BotStartFailed(e.to_string()))?;
        Ok(me.username().to_string())
    }

    /// Run the bot in polling mode until Ctrl-C, then disconnect every
    /// session.
    pub async fn start_polling(&self) -> Result<()> {
        info!("Starting control bot in polling mode...");

        if let Some(port) = self.health_port {
            tokio::spawn(async move {
                if let Err(e) = liveness::serve_on_port(port).await {
                    error!(port, error = %e, "Liveness endpoint stopped");
                }
            });
        }

        let state_for_commands = Arc::clone(&self.manager);
        let state_for_messages = Arc::clone(&self.manager);

        let handler = dptree::entry()
            .branch(
                Update::filter_message()
                    .filter_command::<Command>()
                    .endpoint(move |bot: Bot, msg: Message, cmd: Command| {
                        let manager = Arc::clone(&state_for_commands);
                        info!(chat_id = %msg.chat.id, "Command matched: {:?}", cmd);
                        async move {
                            let chat_id = msg.chat.id;
                            if let Err(e) = handle_command(bot.clone(), msg, cmd, manager).await {
                                reply_generic_failure(&bot, chat_id, e).await;
                            }
                            respond(())
                        }
                    }),
            )
            .branch(
                Update::filter_message()
                    .filter(|msg: Message| {
                        // Unrecognized commands (start with / but didn't parse)
                        msg.text().map(|t| t.starts_with('/')).unwrap_or(false)
                    })
                    .endpoint(move |bot: Bot, msg: Message| async move {
                        if !msg.chat.is_private() {
                            return respond(());
                        }
                        if let Some(text) = msg.text() {
                            info!(cmd = %text, "Unrecognized command");
                            bot.send_message(
                                msg.chat.id,
                                format!(
                                    "Unknown command: {}\n\nUse /help to see available commands.",
                                    text.split_whitespace().next().unwrap_or(text)
                                ),
                            )
                            .await?;
                        }
                        respond(())
                    }),
            )
            .branch(
                Update::filter_message()
                    .filter(|msg: Message| msg.text().is_some() || msg.document().is_some())
                    .endpoint(move |bot: Bot, msg: Message| {
                        let manager = Arc::clone(&state_for_messages);
                        async move {
                            let chat_id = msg.chat.id;
                            if let Err(e) = handle_message(bot.clone(), msg, manager).await {
                                reply_generic_failure(&bot, chat_id, e).await;
                            }
                            respond(())
                        }
                    }),
            );

        info!("Bot is running! Send /start to begin.");

        Dispatcher::builder(self.bot.clone(), handler)
            .default_handler(|upd| async move {
                warn!("Unhandled update: {:?}", upd.kind);
            })
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        info!("Dispatcher stopped, disconnecting sessions");
        self.manager.shutdown().await;
        Ok(())
    }
}

async fn reply_generic_failure(bot: &Bot, chat_id: ChatId, e: teloxide::RequestError) {
    error!(chat_id = %chat_id, error = %e, "Handler failed");
    if let Err(e) = bot.send_message(chat_id, GENERIC_FAILURE).await {
        warn!(chat_id = %chat_id, error = %e, "Failed to report handler failure");
    }
}
