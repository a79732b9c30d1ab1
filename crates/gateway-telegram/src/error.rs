//! Error types for sessions and the control bot.

use thiserror::Error;

/// Why a connection attempt was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The credential blob is expired, unauthorized or unreadable.
    #[error("credential invalid or expired")]
    CredentialInvalid,

    /// The remote service rejected the API id/hash.
    #[error("invalid key pair")]
    KeyPairInvalid,

    /// Network or protocol failure.
    #[error("{0}")]
    Transport(String),
}

/// Errors surfaced by the session manager and its sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The stored credential blob is expired or unauthorized.
    #[error("Session file is invalid or expired")]
    CredentialInvalid,

    /// The API key pair was rejected.
    #[error("Invalid API ID or Hash")]
    KeyPairInvalid,

    /// Network or protocol failure talking to Telegram.
    #[error("Connection error: {0}")]
    Transport(String),

    /// The user already has a session.
    #[error("You already have a connection. Use /delete to remove it first, or /replace to update it.")]
    AlreadyConnected,

    /// The user is already mid-onboarding.
    #[error("You're already in the connection process. Please complete it first, or /cancel it.")]
    OnboardingInProgress,

    /// The user has no session.
    #[error("No connection found. Use /connect to create one.")]
    NoSession,

    /// The user has no onboarding in progress.
    #[error("No connection process in progress.")]
    NotOnboarding,

    /// An access gate refused the request.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Credential store or blob failure.
    #[error("Storage error: {0}")]
    Persistence(#[from] gateway_persistence::PersistenceError),

    /// Plugin administration failure.
    #[error("Plugin error: {0}")]
    Plugin(#[from] gateway_plugins::PluginError),

    /// Downloading an uploaded file failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// No control bot token configured.
    #[error("TELEGRAM_BOT_TOKEN not set")]
    NoToken,

    /// The control bot could not reach Telegram on startup.
    #[error("Failed to start bot: {0}")]
    BotStartFailed(String),
}

impl SessionError {
    /// Whether this is a state conflict (a flow the user must finish or cancel).
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SessionError::AlreadyConnected | SessionError::OnboardingInProgress
        )
    }
}

impl From<ConnectError> for SessionError {
    fn from(e: ConnectError) -> Self {
        match e {
            ConnectError::CredentialInvalid => SessionError::CredentialInvalid,
            ConnectError::KeyPairInvalid => SessionError::KeyPairInvalid,
            ConnectError::Transport(detail) => SessionError::Transport(detail),
        }
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
