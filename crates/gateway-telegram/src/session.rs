//! One user's authenticated client connection.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use gateway_core::RuntimeStatus;
use gateway_persistence::ApiKeyPair;
use gateway_plugins::{CommandEvent, HandlerRun, HandlerTable, LoadReport, Outcome, PluginRegistry};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connection::{Account, ClientConnection, ClientConnector, ConnectParams};
use crate::error::{Result, SessionError};

/// Text that triggers the built-in liveness reply.
pub const LIVENESS_TRIGGER: &str = "!ping";

/// Fixed liveness acknowledgement.
pub const LIVENESS_REPLY: &str = "pong";

/// Name recorded for handler runs that are not plugin handlers.
pub const BUILTIN_PLUGIN: &str = "builtin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Authenticating,
    Active,
}

struct SessionInner {
    phase: SessionPhase,
    connection: Option<Arc<dyn ClientConnection>>,
    event_task: Option<JoinHandle<()>>,
}

/// Health details reported by `/health`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHealth {
    pub user_id: i64,
    pub api_id: i32,
    pub phase: SessionPhase,
    pub account: Option<Account>,
    pub last_liveness: Option<DateTime<Utc>>,
    pub plugins: Vec<String>,
}

/// A user's client connection, its attached handlers and its liveness state.
///
/// Lifecycle:
///
/// ```text
/// Disconnected --connect()--> Authenticating --ok--> Active
///      ^                            |                   |
///      '-------- error -------------'                   |
///      '------------------- disconnect() ---------------'
/// ```
///
/// While Active, one task reads the connection's events and dispatches each
/// on its own task to the liveness handler and the attached plugins.
pub struct Session {
    user_id: i64,
    keys: ApiKeyPair,
    credential_path: PathBuf,
    connector: Arc<dyn ClientConnector>,
    plugins: Arc<PluginRegistry>,
    status: Arc<RuntimeStatus>,
    inner: Mutex<SessionInner>,
    handlers: HandlerTable,
    last_liveness: RwLock<Option<DateTime<Utc>>>,
}

impl Session {
    pub fn new(
        user_id: i64,
        keys: ApiKeyPair,
        credential_path: PathBuf,
        connector: Arc<dyn ClientConnector>,
        plugins: Arc<PluginRegistry>,
        status: Arc<RuntimeStatus>,
    ) -> Self {
        Self {
            user_id,
            keys,
            credential_path,
            connector,
            plugins,
            status,
            inner: Mutex::new(SessionInner {
                phase: SessionPhase::Disconnected,
                connection: None,
                event_task: None,
            }),
            handlers: HandlerTable::new(),
            last_liveness: RwLock::new(None),
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn keys(&self) -> &ApiKeyPair {
        &self.keys
    }

    pub fn credential_path(&self) -> &Path {
        &self.credential_path
    }

    pub async fn phase(&self) -> SessionPhase {
        self.inner.lock().await.phase
    }

    /// Active with a connection that is still up.
    pub async fn is_live(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.phase == SessionPhase::Active
            && inner
                .connection
                .as_ref()
                .map(|c| c.is_connected())
                .unwrap_or(false)
    }

    pub async fn account(&self) -> Option<Account> {
        let inner = self.inner.lock().await;
        inner.connection.as_ref().map(|c| c.account().clone())
    }

    pub async fn last_liveness(&self) -> Option<DateTime<Utc>> {
        *self.last_liveness.read().await
    }

    /// Names of the attached plugins.
    pub async fn loaded_plugins(&self) -> Vec<String> {
        self.handlers.names().await
    }

    /// Open the connection, load plugins and start the event loop.
    ///
    /// Returns the account's display name. A session that is already live is
    /// left as is; a stale one is torn down and connected again.
    pub async fn connect(self: &Arc<Self>) -> Result<String> {
        let mut inner = self.inner.lock().await;

        if inner.phase == SessionPhase::Active {
            if let Some(conn) = inner.connection.as_ref().filter(|c| c.is_connected()) {
                debug!(user_id = self.user_id, "Session already connected");
                return Ok(conn.account().display_name().to_string());
            }
            info!(user_id = self.user_id, "Session connection is stale, reconnecting");
            self.teardown(&mut inner).await;
        }

        inner.phase = SessionPhase::Authenticating;
        let params = ConnectParams {
            user_id: self.user_id,
            keys: self.keys.clone(),
            credential_path: self.credential_path.clone(),
        };

        let conn = match self.connector.connect(&params).await {
            Ok(conn) => conn,
            Err(e) => {
                inner.phase = SessionPhase::Disconnected;
                warn!(user_id = self.user_id, error = %e, "Session connect failed");
                return Err(SessionError::from(e));
            }
        };

        let report = self.plugins.load_all(self.user_id, &self.handlers).await;
        if !report.failed.is_empty() {
            warn!(user_id = self.user_id, failed = ?report.failed, "Some plugins failed to load");
        }

        let display_name = conn.account().display_name().to_string();
        inner.event_task = Some(spawn_event_loop(Arc::downgrade(self), Arc::clone(&conn)));
        inner.connection = Some(conn);
        inner.phase = SessionPhase::Active;
        self.status.session_activated();

        info!(user_id = self.user_id, account = %display_name, "Session active");
        Ok(display_name)
    }

    /// Close the connection and detach every plugin. Safe to call on a
    /// session that is not connected.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if inner.phase == SessionPhase::Disconnected && inner.connection.is_none() {
            return;
        }
        self.teardown(&mut inner).await;
        info!(user_id = self.user_id, "Session disconnected");
    }

    async fn teardown(&self, inner: &mut SessionInner) {
        if let Some(task) = inner.event_task.take() {
            task.abort();
        }
        self.plugins.unload_all(self.user_id, &self.handlers).await;
        if let Some(conn) = inner.connection.take() {
            conn.disconnect().await;
        }
        if inner.phase == SessionPhase::Active {
            self.status.session_deactivated();
        }
        inner.phase = SessionPhase::Disconnected;
    }

    /// The live connection, if the session is Active.
    async fn active_connection(&self) -> Option<Arc<dyn ClientConnection>> {
        let inner = self.inner.lock().await;
        if inner.phase != SessionPhase::Active {
            return None;
        }
        inner.connection.clone()
    }

    /// Run every handler that wants this event. Nothing runs unless the
    /// session is Active.
    pub async fn handle_event(&self, event: &CommandEvent) -> Vec<HandlerRun> {
        let Some(conn) = self.active_connection().await else {
            debug!(user_id = self.user_id, "Dropping event for inactive session");
            return Vec::new();
        };

        let mut runs = Vec::new();
        if event.text.starts_with(LIVENESS_TRIGGER) {
            runs.push(self.handle_liveness(conn.as_ref(), event).await);
        }
        runs.extend(self.handlers.dispatch(event, &conn).await);
        runs
    }

    async fn handle_liveness(&self, conn: &dyn ClientConnection, event: &CommandEvent) -> HandlerRun {
        let outcome = if self.status.is_paused() {
            Outcome::FailedClosed("paused".to_string())
        } else if event.sender_id != Some(conn.account().id) {
            debug!(user_id = self.user_id, sender = ?event.sender_id, "Ignoring liveness trigger from another sender");
            Outcome::FailedClosed("sender is not the session account".to_string())
        } else {
            match conn.respond(event, LIVENESS_REPLY).await {
                Ok(()) => {
                    *self.last_liveness.write().await = Some(Utc::now());
                    info!(user_id = self.user_id, "Answered liveness ping");
                    Outcome::Succeeded
                }
                Err(e) => {
                    error!(user_id = self.user_id, error = %e, "Failed to answer liveness ping");
                    Outcome::FailedClosed(e.to_string())
                }
            }
        };

        HandlerRun {
            plugin: BUILTIN_PLUGIN.to_string(),
            handler: "ping".to_string(),
            outcome,
        }
    }

    /// Load one unit file into this session. Inactive sessions are skipped.
    pub async fn load_plugin(&self, unit_path: &Path) -> Option<gateway_plugins::Result<String>> {
        self.active_connection().await?;
        Some(self.plugins.load_one(self.user_id, &self.handlers, unit_path).await)
    }

    /// Detach one plugin. Returns whether it was attached.
    pub async fn unload_plugin(&self, name: &str) -> bool {
        self.plugins.unload_one(self.user_id, &self.handlers, name).await
    }

    /// Reload every plugin. Inactive sessions are skipped.
    pub async fn reload_plugins(&self) -> Option<LoadReport> {
        self.active_connection().await?;
        Some(self.plugins.reload_all(self.user_id, &self.handlers).await)
    }

    pub async fn health(&self) -> SessionHealth {
        let (phase, account) = {
            let inner = self.inner.lock().await;
            (
                inner.phase,
                inner.connection.as_ref().map(|c| c.account().clone()),
            )
        };
        SessionHealth {
            user_id: self.user_id,
            api_id: self.keys.api_id,
            phase,
            account,
            last_liveness: self.last_liveness().await,
            plugins: self.loaded_plugins().await,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("api_id", &self.keys.api_id)
            .finish_non_exhaustive()
    }
}

fn spawn_event_loop(session: Weak<Session>, conn: Arc<dyn ClientConnection>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = conn.next_event().await {
            let Some(session) = session.upgrade() else {
                break;
            };
            tokio::spawn(async move {
                let runs = session.handle_event(&event).await;
                for run in runs.iter().filter(|r| !r.outcome.is_success()) {
                    debug!(
                        user_id = session.user_id,
                        plugin = %run.plugin,
                        handler = %run.handler,
                        outcome = ?run.outcome,
                        "Handler did not succeed"
                    );
                }
            });
        }
        debug!("Session event loop finished");
    })
}
