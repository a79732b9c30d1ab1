//! Error types for plugin loading and execution.

use thiserror::Error;

/// Errors raised while loading, running or unloading a plugin.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The unit names a plugin the catalog does not know.
    #[error("unknown plugin unit: {0}")]
    UnknownUnit(String),

    /// The unit file name is not `<name>.plugin` with a safe name.
    #[error("invalid plugin unit name: {0}")]
    InvalidUnitName(String),

    /// The plugin's initializer failed.
    #[error("plugin {name} failed to initialize: {reason}")]
    InitFailed { name: String, reason: String },

    /// The plugin's cleanup hook failed.
    #[error("plugin {name} cleanup failed: {reason}")]
    CleanupFailed { name: String, reason: String },

    /// An outbound HTTP request failed or timed out.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Sending or editing a chat message failed.
    #[error("send failed: {0}")]
    Send(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistence error while installing or removing a unit.
    #[error(transparent)]
    Persistence(#[from] gateway_persistence::PersistenceError),
}

impl From<reqwest::Error> for PluginError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PluginError::Http(format!("request timed out: {}", e))
        } else {
            PluginError::Http(e.to_string())
        }
    }
}

/// Result type for plugin operations.
pub type Result<T> = std::result::Result<T, PluginError>;
