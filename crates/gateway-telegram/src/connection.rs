//! The seam between a session and the Telegram client library.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use gateway_persistence::ApiKeyPair;
use gateway_plugins::{CommandEvent, Responder};

use crate::error::ConnectError;

/// Everything needed to open one user's client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub user_id: i64,
    pub keys: ApiKeyPair,
    /// Credential blob uploaded during onboarding.
    pub credential_path: PathBuf,
}

/// The Telegram account a connection is authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
}

impl Account {
    /// Username if set, first name otherwise.
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.first_name)
    }
}

/// Opens authenticated connections.
///
/// An implementation must return an error rather than a connection that is
/// not authorized.
#[async_trait]
pub trait ClientConnector: Send + Sync {
    async fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn ClientConnection>, ConnectError>;
}

/// A live, authenticated client connection.
#[async_trait]
pub trait ClientConnection: Responder {
    /// The account this connection is logged in as.
    fn account(&self) -> &Account;

    fn is_connected(&self) -> bool;

    /// Next message authored by the account itself. `None` once the
    /// connection is closed.
    async fn next_event(&self) -> Option<CommandEvent>;

    /// Close the connection. Calling it twice is harmless.
    async fn disconnect(&self);
}
