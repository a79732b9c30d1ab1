//! MTProto client connections backed by `grammers`.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gateway_plugins::{CommandEvent, PluginError, Responder};
use grammers_client::{Client, Config, Update};
use grammers_session::{PackedChat, Session};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connection::{Account, ClientConnection, ClientConnector, ConnectParams};
use crate::error::ConnectError;

/// Connector that logs in with the uploaded session file.
#[derive(Debug, Default, Clone)]
pub struct MtprotoConnector;

impl MtprotoConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Sort a client library error into the connect taxonomy.
fn classify(error: impl Display) -> ConnectError {
    let detail = error.to_string();
    if detail.contains("API_ID_INVALID") || detail.contains("API_ID_PUBLISHED_FLOOD") {
        ConnectError::KeyPairInvalid
    } else if detail.contains("AUTH_KEY_UNREGISTERED")
        || detail.contains("AUTH_KEY_INVALID")
        || detail.contains("SESSION_REVOKED")
        || detail.contains("SESSION_EXPIRED")
        || detail.contains("USER_DEACTIVATED")
    {
        ConnectError::CredentialInvalid
    } else {
        ConnectError::Transport(detail)
    }
}

#[async_trait]
impl ClientConnector for MtprotoConnector {
    async fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn ClientConnection>, ConnectError> {
        let session = Session::load_file(&params.credential_path).map_err(|e| {
            warn!(user_id = params.user_id, error = %e, "Unreadable session file");
            ConnectError::CredentialInvalid
        })?;

        let client = Client::connect(Config {
            session,
            api_id: params.keys.api_id,
            api_hash: params.keys.api_hash.clone(),
            params: Default::default(),
        })
        .await
        .map_err(classify)?;

        if !client.is_authorized().await.map_err(classify)? {
            return Err(ConnectError::CredentialInvalid);
        }

        let me = client.get_me().await.map_err(classify)?;
        let account = Account {
            id: me.id(),
            username: me.username().map(str::to_string),
            first_name: me.first_name().to_string(),
        };
        info!(user_id = params.user_id, account_id = account.id, "MTProto client authorized");

        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(MtprotoConnection {
            client,
            account,
            credential_path: params.credential_path.clone(),
            chats: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            shutdown,
        }))
    }
}

/// One logged-in grammers client.
pub struct MtprotoConnection {
    client: Client,
    account: Account,
    credential_path: PathBuf,
    /// Chats seen in incoming updates, needed to address replies.
    chats: Mutex<HashMap<i64, PackedChat>>,
    connected: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl MtprotoConnection {
    fn packed_chat(&self, chat_id: i64) -> Result<PackedChat, PluginError> {
        self.chats
            .lock()
            .ok()
            .and_then(|chats| chats.get(&chat_id).copied())
            .ok_or_else(|| PluginError::Send(format!("unknown chat {}", chat_id)))
    }

    fn remember_chat(&self, chat_id: i64, packed: PackedChat) {
        if let Ok(mut chats) = self.chats.lock() {
            chats.insert(chat_id, packed);
        }
    }
}

#[async_trait]
impl Responder for MtprotoConnection {
    async fn respond(&self, event: &CommandEvent, text: &str) -> gateway_plugins::Result<()> {
        let chat = self.packed_chat(event.chat_id)?;
        self.client
            .send_message(chat, text)
            .await
            .map_err(|e| PluginError::Send(e.to_string()))?;
        Ok(())
    }

    async fn edit(&self, event: &CommandEvent, text: &str) -> gateway_plugins::Result<()> {
        let chat = self.packed_chat(event.chat_id)?;
        self.client
            .edit_message(chat, event.message_id, text)
            .await
            .map_err(|e| PluginError::Send(e.to_string()))
    }
}

#[async_trait]
impl ClientConnection for MtprotoConnection {
    fn account(&self) -> &Account {
        &self.account
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn next_event(&self) -> Option<CommandEvent> {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let closed = *shutdown.borrow();
            if closed || !self.is_connected() {
                return None;
            }

            let update = tokio::select! {
                _ = shutdown.changed() => return None,
                update = self.client.next_update() => update,
            };

            match update {
                Ok(Update::NewMessage(message)) if message.outgoing() => {
                    let chat = message.chat();
                    self.remember_chat(chat.id(), chat.pack());
                    return Some(CommandEvent::new(
                        chat.id(),
                        message.id(),
                        message.sender().map(|s| s.id()),
                        message.text(),
                    ));
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(account_id = self.account.id, error = %e, "Update stream failed");
                    self.connected.store(false, Ordering::Relaxed);
                    return None;
                }
            }
        }
    }

    async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::Relaxed) {
            return;
        }
        self.shutdown.send_replace(true);
        if let Err(e) = self.client.session().save_to_file(&self.credential_path) {
            warn!(account_id = self.account.id, error = %e, "Failed to save session file");
        }
        debug!(account_id = self.account.id, "MTProto client disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(
            classify("rpc error 400: API_ID_INVALID"),
            ConnectError::KeyPairInvalid
        );
        assert_eq!(
            classify("rpc error 401: AUTH_KEY_UNREGISTERED"),
            ConnectError::CredentialInvalid
        );
        assert_eq!(
            classify("connection reset"),
            ConnectError::Transport("connection reset".to_string())
        );
    }
}
