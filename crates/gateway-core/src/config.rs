//! Shared configuration for the userbot gateway.
//!
//! Provides functions to locate the gateway's data directory and reads the
//! runtime settings from the environment.
//!
//! # Storage Structure
//!
//! All application data is stored under `~/.userbot-gateway/`:
//!
//! ```text
//! ~/.userbot-gateway/
//! ├── .env.local    # Secrets (bot token)
//! ├── users.json    # Credential store
//! ├── sessions/     # Per-user credential blobs
//! └── plugins/      # Enabled plugin units (<name>.plugin)
//! ```
//!
//! # Environment Variables
//!
//! - `USERBOT_DATA_DIR`: Override the data directory
//! - `TELEGRAM_BOT_TOKEN` (or legacy `BOT_TOKEN`): Control bot token
//! - `FORCE_JOIN_CHANNEL`: Channel users must join before using the bot
//! - `ADMIN_IDS`: Comma-separated user ids allowed to run privileged commands
//! - `PLUGIN_HTTP_TIMEOUT_SECS`: Timeout for plugin HTTP calls (default 15)

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable for a custom data directory.
pub const DATA_DIR_ENV: &str = "USERBOT_DATA_DIR";

/// Environment variable holding the control bot token.
pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

/// Legacy name for the bot token variable.
pub const LEGACY_BOT_TOKEN_ENV: &str = "BOT_TOKEN";

/// Environment variable naming the required channel.
pub const FORCE_JOIN_CHANNEL_ENV: &str = "FORCE_JOIN_CHANNEL";

/// Environment variable listing privileged user ids.
pub const ADMIN_IDS_ENV: &str = "ADMIN_IDS";

/// Environment variable for the plugin HTTP timeout.
pub const PLUGIN_HTTP_TIMEOUT_ENV: &str = "PLUGIN_HTTP_TIMEOUT_SECS";

/// Default data directory name under home.
const DEFAULT_DATA_DIR: &str = ".userbot-gateway";

/// Default plugin HTTP timeout in seconds.
const DEFAULT_PLUGIN_HTTP_TIMEOUT_SECS: u64 = 15;

const PLUGINS_SUBDIR: &str = "plugins";

static DATA_DIR_CACHE: OnceLock<PathBuf> = OnceLock::new();

/// Get the gateway data directory.
///
/// The data directory is determined by:
/// 1. `USERBOT_DATA_DIR` environment variable if set
/// 2. `~/.userbot-gateway` if home directory is available
/// 3. `.userbot-gateway` in current directory as fallback
pub fn data_dir() -> PathBuf {
    DATA_DIR_CACHE
        .get_or_init(|| {
            std::env::var(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    dirs::home_dir()
                        .map(|h| h.join(DEFAULT_DATA_DIR))
                        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
                })
        })
        .clone()
}

/// Get the plugins directory for a data directory.
pub fn plugins_dir_in(base: &std::path::Path) -> PathBuf {
    base.join(PLUGINS_SUBDIR)
}

/// Get the `.env.local` file for a data directory.
pub fn env_file_in(base: &std::path::Path) -> PathBuf {
    base.join(".env.local")
}

/// Settings read from the environment at startup.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Control bot token, if configured.
    pub bot_token: Option<String>,
    /// Channel (`@username` or numeric id) users must have joined.
    pub force_join_channel: Option<String>,
    /// Users allowed to run privileged commands.
    pub admin_ids: HashSet<i64>,
    /// Timeout applied to every plugin HTTP request.
    pub plugin_http_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            bot_token: None,
            force_join_channel: None,
            admin_ids: HashSet::new(),
            plugin_http_timeout: Duration::from_secs(DEFAULT_PLUGIN_HTTP_TIMEOUT_SECS),
        }
    }
}

impl GatewaySettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        let bot_token = non_empty_env(BOT_TOKEN_ENV).or_else(|| non_empty_env(LEGACY_BOT_TOKEN_ENV));

        let plugin_http_timeout = non_empty_env(PLUGIN_HTTP_TIMEOUT_ENV)
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_PLUGIN_HTTP_TIMEOUT_SECS));

        Self {
            bot_token,
            force_join_channel: non_empty_env(FORCE_JOIN_CHANNEL_ENV),
            admin_ids: non_empty_env(ADMIN_IDS_ENV)
                .map(|v| parse_admin_ids(&v))
                .unwrap_or_default(),
            plugin_http_timeout,
        }
    }

    /// Whether `user_id` may run privileged commands.
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a comma-separated list of user ids, skipping entries that are not
/// integers.
pub fn parse_admin_ids(raw: &str) -> HashSet<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(entry = %s, "Ignoring malformed admin id");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_data_dir_smoke() {
        let dir = data_dir();
        assert!(dir.is_absolute() || dir.ends_with(".userbot-gateway") || std::env::var(DATA_DIR_ENV).is_ok());
    }

    #[test]
    fn test_plugins_dir_name() {
        assert_eq!(plugins_dir_in(Path::new("/data")), Path::new("/data/plugins"));
    }

    #[test]
    fn test_env_file_name() {
        assert!(env_file_in(Path::new("/data")).ends_with(".env.local"));
    }

    #[test]
    fn test_parse_admin_ids() {
        let ids = parse_admin_ids(" 1, 22 ,x,, -5 ");
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&1));
        assert!(ids.contains(&22));
        assert!(ids.contains(&-5));
    }

    #[test]
    fn test_default_settings() {
        let settings = GatewaySettings::default();
        assert_eq!(settings.plugin_http_timeout, Duration::from_secs(15));
        assert!(!settings.is_admin(1));
    }
}
