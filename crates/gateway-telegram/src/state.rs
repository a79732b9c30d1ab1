//! Shared state for the control bot: every session plus the onboarding flows.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gateway_core::{plugins_dir_in, GatewaySettings, RuntimeStatus};
use gateway_persistence::CredentialStore;
use gateway_plugins::{validate_unit_name, LoadReport, PluginCatalog, PluginRegistry};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::connection::ClientConnector;
use crate::error::{Result, SessionError};
use crate::onboarding::{
    OnboardingInput, OnboardingReply, OnboardingState, OnboardingStep, TextOutcome,
};
use crate::session::{Session, SessionHealth};

/// Result of bringing up the stored sessions at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectReport {
    /// `(user id, display name)` for every session that came up.
    pub connected: Vec<(i64, String)>,
    /// `(user id, reason)` for every session that did not.
    pub failed: Vec<(i64, String)>,
}

/// Numbers reported by `/stats`.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayStats {
    pub registered_sessions: usize,
    pub active_sessions: usize,
    pub onboarding: usize,
    pub uptime: Duration,
    pub paused: bool,
    pub plugin_units: Vec<String>,
}

/// Outcome of installing a plugin unit across sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub name: String,
    pub loaded: Vec<i64>,
    pub failed: Vec<(i64, String)>,
}

/// Outcome of removing a plugin unit across sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveReport {
    /// Sessions the plugin was detached from.
    pub unloaded: usize,
    /// Whether the unit file existed.
    pub file_removed: bool,
}

/// The single authority on who has a session and who is onboarding.
///
/// The two registries are only reachable through the guarded operations
/// below. Every operation on one user holds that user's lock for its whole
/// duration, connect attempts included, so a user never appears in both
/// registries and two messages from the same user never interleave.
pub struct SessionManager {
    sessions: RwLock<HashMap<i64, Arc<Session>>>,
    onboarding: RwLock<HashMap<i64, OnboardingState>>,
    user_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    store: CredentialStore,
    plugins: Arc<PluginRegistry>,
    connector: Arc<dyn ClientConnector>,
    status: Arc<RuntimeStatus>,
    settings: GatewaySettings,
}

impl SessionManager {
    pub fn new(
        store: CredentialStore,
        plugins: Arc<PluginRegistry>,
        connector: Arc<dyn ClientConnector>,
        status: Arc<RuntimeStatus>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            onboarding: RwLock::new(HashMap::new()),
            user_locks: Mutex::new(HashMap::new()),
            store,
            plugins,
            connector,
            status,
            settings,
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn status(&self) -> &Arc<RuntimeStatus> {
        &self.status
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    async fn user_lock(&self, user_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        Arc::clone(locks.entry(user_id).or_default())
    }

    /// Drop the user's lock entry once nobody else holds or waits on it.
    async fn prune_lock(&self, user_id: i64) {
        let mut locks = self.user_locks.lock().await;
        if locks.get(&user_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&user_id);
        }
    }

    fn new_session(&self, user_id: i64, keys: gateway_persistence::ApiKeyPair) -> Arc<Session> {
        Arc::new(Session::new(
            user_id,
            keys,
            self.store.credential_path(user_id),
            Arc::clone(&self.connector),
            Arc::clone(&self.plugins),
            Arc::clone(&self.status),
        ))
    }

    async fn save_store(&self) -> Result<()> {
        let sessions = self.sessions.read().await;
        self.store
            .save(sessions.iter().map(|(id, s)| (*id, s.keys())))?;
        Ok(())
    }

    /// Persist the registry as it will be once `user_id` is removed.
    async fn save_store_without(&self, user_id: i64) -> Result<()> {
        let sessions = self.sessions.read().await;
        self.store.save(
            sessions
                .iter()
                .filter(|(id, _)| **id != user_id)
                .map(|(id, s)| (*id, s.keys())),
        )?;
        Ok(())
    }

    pub async fn session(&self, user_id: i64) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&user_id).cloned()
    }

    pub async fn has_session(&self, user_id: i64) -> bool {
        self.sessions.read().await.contains_key(&user_id)
    }

    /// Current step of a live (non-expired) onboarding flow.
    pub async fn onboarding_step(&self, user_id: i64) -> Option<OnboardingStep> {
        let now = Utc::now();
        self.onboarding
            .read()
            .await
            .get(&user_id)
            .filter(|s| !s.is_expired(now))
            .map(|s| s.step)
    }

    pub async fn is_onboarding(&self, user_id: i64) -> bool {
        self.onboarding_step(user_id).await.is_some()
    }

    /// Whether any onboarding state is held for the user, expired or not.
    pub async fn has_onboarding_entry(&self, user_id: i64) -> bool {
        self.onboarding.read().await.contains_key(&user_id)
    }

    /// Check the access rules that depend only on who is asking.
    pub fn authorize(&self, user_id: i64, privileged: bool) -> Result<()> {
        if privileged && !self.settings.is_admin(user_id) {
            return Err(SessionError::AccessDenied(
                "this command is restricted to administrators".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a placeholder session for every stored credential record.
    ///
    /// Nothing is connected yet; see [`SessionManager::reconnect_all`].
    pub async fn load_sessions(&self) -> Result<usize> {
        let records = self.store.load()?;
        let mut sessions = self.sessions.write().await;
        for (user_id, keys) in records {
            sessions
                .entry(user_id)
                .or_insert_with(|| self.new_session(user_id, keys));
        }
        Ok(sessions.len())
    }

    /// Connect every registered session. Failures are logged and reported,
    /// never fatal.
    pub async fn reconnect_all(&self) -> ReconnectReport {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();

        let attempts = sessions.into_iter().map(|session| async move {
            let lock = self.user_lock(session.user_id()).await;
            let _guard = lock.lock().await;
            (session.user_id(), session.connect().await)
        });

        let mut report = ReconnectReport::default();
        for (user_id, result) in futures::future::join_all(attempts).await {
            match result {
                Ok(name) => {
                    info!(user_id, account = %name, "Reconnected session");
                    report.connected.push((user_id, name));
                }
                Err(e) => {
                    error!(user_id, error = %e, "Failed to reconnect session");
                    report.failed.push((user_id, e.to_string()));
                }
            }
        }
        report.connected.sort();
        report.failed.sort();
        report
    }

    async fn begin_locked(&self, user_id: i64) -> Result<()> {
        if self.has_session(user_id).await {
            return Err(SessionError::AlreadyConnected);
        }
        let now = Utc::now();
        let mut onboarding = self.onboarding.write().await;
        if let Some(existing) = onboarding.get(&user_id) {
            if !existing.is_expired(now) {
                return Err(SessionError::OnboardingInProgress);
            }
            debug!(user_id, "Replacing expired onboarding state");
        }
        onboarding.insert(user_id, OnboardingState::new(now));
        info!(user_id, "Onboarding started");
        Ok(())
    }

    /// Start onboarding for a user with neither a session nor a live flow.
    pub async fn begin_onboarding(&self, user_id: i64) -> Result<()> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        self.begin_locked(user_id).await
    }

    /// Abandon the user's onboarding flow.
    pub async fn cancel_onboarding(&self, user_id: i64) -> Result<()> {
        let lock = self.user_lock(user_id).await;
        let guard = lock.lock().await;
        let removed = self.onboarding.write().await.remove(&user_id);
        drop(guard);
        drop(lock);
        self.prune_lock(user_id).await;

        match removed {
            Some(_) => {
                info!(user_id, "Onboarding cancelled");
                Ok(())
            }
            None => Err(SessionError::NotOnboarding),
        }
    }

    async fn discard_onboarding(&self, user_id: i64) {
        self.onboarding.write().await.remove(&user_id);
    }

    /// Feed one message to the user's onboarding flow.
    pub async fn advance_onboarding(&self, user_id: i64, input: OnboardingInput) -> Result<OnboardingReply> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let now = Utc::now();
        let Some(mut state) = self.onboarding.read().await.get(&user_id).cloned() else {
            return Err(SessionError::NotOnboarding);
        };
        if state.is_expired(now) {
            self.discard_onboarding(user_id).await;
            info!(user_id, "Onboarding expired");
            return Ok(OnboardingReply::Expired);
        }

        let upload = match input {
            OnboardingInput::Text(text) => {
                let reply = match state.accept_text(&text, now) {
                    TextOutcome::Advanced(step) => OnboardingReply::Prompt(step),
                    TextOutcome::Rejected(step) => OnboardingReply::Reprompt(step),
                };
                self.onboarding.write().await.insert(user_id, state);
                return Ok(reply);
            }
            OnboardingInput::File(upload) => upload,
        };

        if !state.accepts_file(upload.file_name()) {
            return Ok(OnboardingReply::Reprompt(state.step));
        }
        let Some(keys) = state.keys() else {
            // accept_text fills both parts before the file step
            self.discard_onboarding(user_id).await;
            return Ok(OnboardingReply::Failed(SessionError::NotOnboarding));
        };

        let bytes = match upload.fetch().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(user_id, error = %e, "Credential download failed");
                self.discard_onboarding(user_id).await;
                return Ok(OnboardingReply::Failed(e));
            }
        };

        let written = self
            .store
            .ensure_sessions_dir()
            .and_then(|()| self.store.write_credential(user_id, &bytes));
        if let Err(e) = written {
            error!(user_id, error = %e, "Failed to store credential file");
            self.discard_onboarding(user_id).await;
            return Ok(OnboardingReply::Failed(e.into()));
        }

        let session = self.new_session(user_id, keys);
        match session.connect().await {
            Ok(display_name) => {
                self.discard_onboarding(user_id).await;
                self.sessions.write().await.insert(user_id, Arc::clone(&session));
                if let Err(e) = self.save_store().await {
                    error!(user_id, error = %e, "Failed to persist credential store, rolling back");
                    self.sessions.write().await.remove(&user_id);
                    session.disconnect().await;
                    if let Err(rm) = self.store.remove_credential(user_id) {
                        warn!(user_id, error = %rm, "Failed to remove credential file");
                    }
                    return Ok(OnboardingReply::Failed(e));
                }
                info!(user_id, account = %display_name, "Onboarding completed");
                Ok(OnboardingReply::Connected { display_name })
            }
            Err(e) => {
                if let Err(rm) = self.store.remove_credential(user_id) {
                    warn!(user_id, error = %rm, "Failed to remove rejected credential file");
                }
                self.discard_onboarding(user_id).await;
                info!(user_id, error = %e, "Onboarding failed");
                Ok(OnboardingReply::Failed(e))
            }
        }
    }

    /// Tear down the user's session and start a fresh onboarding flow.
    ///
    /// The stored record is dropped; the credential file stays until the new
    /// flow overwrites it.
    pub async fn replace(&self, user_id: i64) -> Result<()> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        if !self.has_session(user_id).await {
            return Err(SessionError::NoSession);
        }
        self.save_store_without(user_id).await?;
        let removed = self.sessions.write().await.remove(&user_id);
        if let Some(session) = removed {
            session.disconnect().await;
        }

        // Any flow left over would be stale; the session existed until now
        self.discard_onboarding(user_id).await;
        self.begin_locked(user_id).await?;
        info!(user_id, "Session replaced, onboarding restarted");
        Ok(())
    }

    /// Remove the user's session, record and credential file.
    ///
    /// The store is rewritten first; if that fails nothing else changes.
    pub async fn delete(&self, user_id: i64) -> Result<()> {
        let lock = self.user_lock(user_id).await;
        let guard = lock.lock().await;

        if !self.has_session(user_id).await {
            return Err(SessionError::NoSession);
        }
        self.save_store_without(user_id).await?;
        let removed = self.sessions.write().await.remove(&user_id);
        if let Some(session) = removed {
            session.disconnect().await;
        }

        if let Err(e) = self.store.remove_credential(user_id) {
            warn!(user_id, error = %e, "Failed to remove credential file");
        }
        info!(user_id, "Session deleted");

        drop(guard);
        drop(lock);
        self.prune_lock(user_id).await;
        Ok(())
    }

    /// Report on the user's session, reconnecting it first if it is stale.
    pub async fn health(&self, user_id: i64) -> Result<SessionHealth> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let session = self.session(user_id).await.ok_or(SessionError::NoSession)?;
        if !session.is_live().await {
            session.connect().await?;
        }
        Ok(session.health().await)
    }

    /// Pause liveness replies. Returns whether they were already paused.
    pub fn pause(&self) -> bool {
        let was = self.status.pause();
        info!(was_paused = was, "Liveness replies paused");
        was
    }

    /// Resume liveness replies. Returns whether they were paused.
    pub fn resume(&self) -> bool {
        let was = self.status.resume();
        info!(was_paused = was, "Liveness replies resumed");
        was
    }

    pub async fn stats(&self) -> GatewayStats {
        let now = Utc::now();
        let plugin_units = match self.plugins.discover() {
            Ok(units) => units.into_iter().map(|u| u.name).collect(),
            Err(e) => {
                warn!(error = %e, "Failed to list plugin units");
                Vec::new()
            }
        };
        GatewayStats {
            registered_sessions: self.sessions.read().await.len(),
            active_sessions: self.status.active_sessions(),
            onboarding: self
                .onboarding
                .read()
                .await
                .values()
                .filter(|s| !s.is_expired(now))
                .count(),
            uptime: self.status.uptime(),
            paused: self.status.is_paused(),
            plugin_units,
        }
    }

    /// Install a plugin unit and load it into every active session.
    pub async fn install_plugin(&self, file_name: &str, contents: &[u8]) -> Result<InstallReport> {
        let unit = self.plugins.install(file_name, contents)?;
        let mut report = InstallReport {
            name: unit.name.clone(),
            ..Default::default()
        };

        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            match session.load_plugin(&unit.path).await {
                Some(Ok(_)) => report.loaded.push(session.user_id()),
                Some(Err(e)) => report.failed.push((session.user_id(), e.to_string())),
                None => {}
            }
        }
        report.loaded.sort();
        info!(plugin = %report.name, loaded = report.loaded.len(), "Plugin installed");
        Ok(report)
    }

    /// Detach a plugin from every session and delete its unit file.
    pub async fn remove_plugin(&self, name: &str) -> Result<RemoveReport> {
        validate_unit_name(name)?;
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut report = RemoveReport::default();
        for session in sessions {
            if session.unload_plugin(name).await {
                report.unloaded += 1;
            }
        }
        report.file_removed = self.plugins.uninstall(name)?;
        info!(plugin = %name, unloaded = report.unloaded, "Plugin removed");
        Ok(report)
    }

    /// Reload every plugin in every active session.
    pub async fn reload_plugins(&self) -> Vec<(i64, LoadReport)> {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut reports = Vec::new();
        for session in sessions {
            if let Some(report) = session.reload_plugins().await {
                reports.push((session.user_id(), report));
            }
        }
        reports.sort_by_key(|(id, _)| *id);
        reports
    }

    /// Disconnect every session. Registrations are kept.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        futures::future::join_all(sessions.iter().map(|s| s.disconnect())).await;
        info!(count = sessions.len(), "All sessions disconnected");
    }
}

/// Build a manager over a data directory with the built-in plugin catalog.
pub fn create_manager(
    base_dir: &Path,
    settings: GatewaySettings,
    connector: Arc<dyn ClientConnector>,
) -> Result<Arc<SessionManager>> {
    let status = Arc::new(RuntimeStatus::new());
    let plugins = PluginRegistry::new(
        plugins_dir_in(base_dir),
        PluginCatalog::new(),
        Arc::clone(&status),
        settings.plugin_http_timeout,
    )?;
    Ok(Arc::new(SessionManager::new(
        CredentialStore::new(base_dir),
        Arc::new(plugins),
        connector,
        status,
        settings,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use async_trait::async_trait;
    use gateway_plugins::{CommandEvent, Responder};
    use tempfile::tempdir;

    use crate::connection::{Account, ClientConnection, ConnectParams};
    use crate::error::ConnectError;
    use crate::onboarding::{InMemoryUpload, ONBOARDING_TTL_MINUTES};

    struct StubConnection {
        account: Account,
    }

    #[async_trait]
    impl Responder for StubConnection {
        async fn respond(&self, _event: &CommandEvent, _text: &str) -> gateway_plugins::Result<()> {
            Ok(())
        }

        async fn edit(&self, _event: &CommandEvent, _text: &str) -> gateway_plugins::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ClientConnection for StubConnection {
        fn account(&self) -> &Account {
            &self.account
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn next_event(&self) -> Option<gateway_plugins::CommandEvent> {
            None
        }

        async fn disconnect(&self) {}
    }

    struct StubConnector;

    #[async_trait]
    impl ClientConnector for StubConnector {
        async fn connect(
            &self,
            params: &ConnectParams,
        ) -> std::result::Result<Arc<dyn crate::connection::ClientConnection>, ConnectError> {
            Ok(Arc::new(StubConnection {
                account: Account {
                    id: params.user_id,
                    username: None,
                    first_name: "Stub".to_string(),
                },
            }))
        }
    }

    fn manager_in(dir: &Path, settings: GatewaySettings) -> SessionManager {
        let status = Arc::new(RuntimeStatus::new());
        let plugins = PluginRegistry::new(
            dir.join("plugins"),
            PluginCatalog::empty(),
            Arc::clone(&status),
            Duration::from_secs(1),
        )
        .unwrap();
        SessionManager::new(
            CredentialStore::new(dir),
            Arc::new(plugins),
            Arc::new(StubConnector),
            status,
            settings,
        )
    }

    async fn onboard(manager: &SessionManager, user_id: i64) {
        manager.begin_onboarding(user_id).await.unwrap();
        for text in ["12345", "abcdef"] {
            manager
                .advance_onboarding(user_id, OnboardingInput::Text(text.to_string()))
                .await
                .unwrap();
        }
        let reply = manager
            .advance_onboarding(
                user_id,
                OnboardingInput::File(Box::new(InMemoryUpload::new("me.session", "blob"))),
            )
            .await
            .unwrap();
        assert!(matches!(reply, OnboardingReply::Connected { .. }));
    }

    #[tokio::test]
    async fn test_expired_onboarding_is_reported_once() {
        let dir = tempdir().unwrap();
        let manager = manager_in(dir.path(), GatewaySettings::default());
        let stale = Utc::now() - chrono::Duration::minutes(ONBOARDING_TTL_MINUTES + 1);
        manager
            .onboarding
            .write()
            .await
            .insert(1, OnboardingState::new(stale));

        assert!(manager.has_onboarding_entry(1).await);
        assert!(!manager.is_onboarding(1).await);
        assert_eq!(manager.stats().await.onboarding, 0);

        let reply = manager
            .advance_onboarding(1, OnboardingInput::Text("12345".to_string()))
            .await
            .unwrap();
        assert!(matches!(reply, OnboardingReply::Expired));
        assert!(!manager.has_onboarding_entry(1).await);

        // An expired flow does not block a fresh one
        manager
            .onboarding
            .write()
            .await
            .insert(1, OnboardingState::new(stale));
        manager.begin_onboarding(1).await.unwrap();
        assert_eq!(manager.onboarding_step(1).await, Some(OnboardingStep::AwaitingId));
        assert_eq!(manager.stats().await.onboarding, 1);
    }

    #[tokio::test]
    async fn test_user_locks_pruned_after_delete_and_cancel() {
        let dir = tempdir().unwrap();
        let manager = manager_in(dir.path(), GatewaySettings::default());

        onboard(&manager, 1).await;
        assert!(manager.user_locks.lock().await.contains_key(&1));
        manager.delete(1).await.unwrap();
        assert!(!manager.user_locks.lock().await.contains_key(&1));

        manager.begin_onboarding(2).await.unwrap();
        manager.cancel_onboarding(2).await.unwrap();
        assert!(manager.user_locks.lock().await.is_empty());
    }

    #[test]
    fn test_authorize_privileged_commands() {
        let dir = tempdir().unwrap();
        let settings = GatewaySettings {
            admin_ids: HashSet::from([1]),
            ..Default::default()
        };
        let manager = manager_in(dir.path(), settings);

        assert!(manager.authorize(1, true).is_ok());
        assert!(manager.authorize(2, false).is_ok());
        let err = manager.authorize(2, true).unwrap_err();
        assert!(matches!(err, SessionError::AccessDenied(_)));
        assert_eq!(
            err.to_string(),
            "Access denied: this command is restricted to administrators"
        );
    }
}
