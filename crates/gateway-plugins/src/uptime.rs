//! `!uptime`: process uptime and session count.

use std::sync::Arc;

use async_trait::async_trait;
use gateway_core::{format_uptime, StatusSnapshot};
use regex::Regex;

use crate::error::{PluginError, Result};
use crate::traits::{CommandEvent, CommandHandler, Outcome, Plugin, PluginContext, PluginInfo, Responder};

pub const UPTIME_PLUGIN: &str = "uptime";

pub struct UptimePlugin {
    info: PluginInfo,
}

impl UptimePlugin {
    pub fn new() -> Self {
        Self {
            info: PluginInfo {
                name: UPTIME_PLUGIN.to_string(),
                description: "Reports gateway uptime and active sessions".to_string(),
                commands: vec!["!uptime".to_string()],
            },
        }
    }
}

impl Default for UptimePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for UptimePlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    async fn init(&self, ctx: &PluginContext) -> Result<Vec<Arc<dyn CommandHandler>>> {
        let pattern = Regex::new(r"^!uptime\b").map_err(|e| PluginError::InitFailed {
            name: UPTIME_PLUGIN.to_string(),
            reason: e.to_string(),
        })?;
        Ok(vec![Arc::new(UptimeHandler {
            pattern,
            ctx: ctx.clone(),
        })])
    }
}

struct UptimeHandler {
    pattern: Regex,
    ctx: PluginContext,
}

/// Render the status block sent in reply to `!uptime`.
pub fn render_status(status: &StatusSnapshot) -> String {
    format!(
        "Gateway status\nUptime: {}\nActive sessions: {}\nStarted: {}\nPaused: {}",
        format_uptime(status.uptime),
        status.active_sessions,
        status.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        if status.paused { "yes" } else { "no" },
    )
}

#[async_trait]
impl CommandHandler for UptimeHandler {
    fn name(&self) -> &str {
        "uptime"
    }

    fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    async fn handle(&self, event: &CommandEvent, responder: &dyn Responder) -> Outcome {
        let text = render_status(&self.ctx.status());
        match responder.respond(event, &text).await {
            Ok(()) => Outcome::Succeeded,
            Err(e) => Outcome::FailedClosed(e.to_string()),
        }
    }
}
