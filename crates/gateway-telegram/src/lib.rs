//! Telegram front end for the userbot gateway.
//!
//! A control bot onboards users who hand over their own account
//! credentials. Each onboarded account runs as a [`Session`] that listens
//! to its own outgoing messages and dispatches them to plugins.
//!
//! # Environment Variables
//!
//! Required:
//! - `TELEGRAM_BOT_TOKEN`: Control bot token from @BotFather
//!
//! Optional:
//! - `FORCE_JOIN_CHANNEL`: Channel users must join before using the bot
//! - `ADMIN_IDS`: Comma-separated ids allowed to run privileged commands
//! - `PLUGIN_HTTP_TIMEOUT_SECS`: Timeout for plugin HTTP calls
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gateway_core::GatewaySettings;
//! use gateway_telegram::{create_manager, GatewayBot, MtprotoConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let base = gateway_core::data_dir();
//!     let manager = create_manager(&base, GatewaySettings::from_env(), Arc::new(MtprotoConnector::new()))?;
//!     manager.load_sessions().await?;
//!     manager.reconnect_all().await;
//!
//!     let bot = GatewayBot::new(manager, Some(7860))?;
//!     bot.start_polling().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Commands
//!
//! - `/start`, `/help`: Welcome message and help
//! - `/connect`: Onboard an account (`/cancel` aborts)
//! - `/replace`, `/delete`, `/health`: Manage your session
//! - `/pause`, `/restart`, `/stats`, `/upload`, `/reload`, `/remove <name>`: Admin only

pub mod bot;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod liveness;
#[cfg(feature = "mtproto")]
pub mod mtproto;
pub mod onboarding;
pub mod session;
pub mod state;

pub use bot::GatewayBot;
pub use connection::{Account, ClientConnection, ClientConnector, ConnectParams};
pub use error::{ConnectError, Result, SessionError};
pub use handlers::Command;
#[cfg(feature = "mtproto")]
pub use mtproto::MtprotoConnector;
pub use onboarding::{
    CredentialUpload, InMemoryUpload, OnboardingInput, OnboardingReply, OnboardingStep,
    ONBOARDING_TTL_MINUTES,
};
pub use session::{Session, SessionHealth, SessionPhase, LIVENESS_REPLY, LIVENESS_TRIGGER};
pub use state::{
    create_manager, GatewayStats, InstallReport, ReconnectReport, RemoveReport, SessionManager,
};
