//! Core traits for session plugins.
//!
//! A plugin is a compiled-in unit that attaches command handlers to one
//! user's session. The session feeds every message its account sends through
//! the attached handlers; a handler that matches the text runs and answers
//! through a [`Responder`] backed by the session's connection.
//!
//! The interface:
//!
//! - [`Plugin::init`] returns the handlers to attach for one user
//! - [`Plugin::cleanup`] is an optional hook run when the plugin is detached
//! - [`CommandHandler::handle`] reports an [`Outcome`] so callers can tell a
//!   reported failure from a silent one

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gateway_core::{RuntimeStatus, StatusSnapshot};

use crate::error::{PluginError, Result};

/// A message authored by the session's own account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEvent {
    /// Chat the message was sent in.
    pub chat_id: i64,
    /// Id of the message inside that chat.
    pub message_id: i32,
    /// Author of the message, when the transport could resolve it.
    pub sender_id: Option<i64>,
    /// Message text.
    pub text: String,
}

impl CommandEvent {
    pub fn new(chat_id: i64, message_id: i32, sender_id: Option<i64>, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            message_id,
            sender_id,
            text: text.into(),
        }
    }
}

/// What a handler run amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The command did what it was asked.
    Succeeded,
    /// The command failed and the failure was reported in the chat.
    FailedOpen(String),
    /// The command failed without any chat output.
    FailedClosed(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

/// One handler execution, as recorded by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerRun {
    /// Plugin (or built-in) the handler belongs to.
    pub plugin: String,
    /// Handler name.
    pub handler: String,
    pub outcome: Outcome,
}

/// Outbound side of a session connection.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Send a new message to the chat the event came from.
    async fn respond(&self, event: &CommandEvent, text: &str) -> Result<()>;

    /// Replace the text of the event's own message.
    async fn edit(&self, event: &CommandEvent, text: &str) -> Result<()>;
}

#[async_trait]
impl<T: Responder + ?Sized> Responder for Arc<T> {
    async fn respond(&self, event: &CommandEvent, text: &str) -> Result<()> {
        (**self).respond(event, text).await
    }

    async fn edit(&self, event: &CommandEvent, text: &str) -> Result<()> {
        (**self).edit(event, text).await
    }
}

/// A single command a plugin contributes to a session.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handler name, used in logs and dispatch reports.
    fn name(&self) -> &str;

    /// Whether this handler wants the message.
    fn matches(&self, text: &str) -> bool;

    /// Run the command.
    async fn handle(&self, event: &CommandEvent, responder: &dyn Responder) -> Outcome;
}

/// Information about a plugin.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    /// Unit name; the on-disk unit file is `<name>.plugin`.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Commands the plugin answers to, for help output.
    pub commands: Vec<String>,
}

/// Everything a plugin may use while serving one user.
///
/// Process-wide metrics are only reachable through [`PluginContext::status`],
/// a read-only snapshot.
#[derive(Clone)]
pub struct PluginContext {
    /// Identity of the user whose session the plugin is attached to.
    pub user_id: i64,
    /// HTTP client with the gateway's plugin timeout applied.
    pub http: reqwest::Client,
    status: Arc<RuntimeStatus>,
}

impl PluginContext {
    pub fn new(user_id: i64, http: reqwest::Client, status: Arc<RuntimeStatus>) -> Self {
        Self {
            user_id,
            http,
            status,
        }
    }

    /// Current process status.
    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// Build the HTTP client plugins share, with an explicit request timeout.
pub fn plugin_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(PluginError::from)
}

/// Trait for plugins.
///
/// # Example
///
/// ```ignore
/// use gateway_plugins::{Plugin, PluginContext};
///
/// async fn attach(plugin: &dyn Plugin, ctx: &PluginContext) {
///     let handlers = plugin.init(ctx).await.unwrap();
///     println!("{} contributes {} handlers", plugin.info().name, handlers.len());
/// }
/// ```
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Returns information about this plugin.
    fn info(&self) -> &PluginInfo;

    /// Prepare the plugin for one user and return the handlers to attach.
    async fn init(&self, ctx: &PluginContext) -> Result<Vec<Arc<dyn CommandHandler>>>;

    /// Release anything `init` set up. Runs when the plugin is detached.
    async fn cleanup(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }
}
