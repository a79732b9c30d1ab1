//! Plugin catalog and the registry that loads plugin units into sessions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use gateway_core::RuntimeStatus;
use gateway_persistence::atomic::{atomic_write, ensure_dir, remove_file_if_exists};
use tracing::{debug, error, info, warn};

use crate::error::{PluginError, Result};
use crate::joke::JokePlugin;
use crate::table::HandlerTable;
use crate::traits::{plugin_http_client, Plugin, PluginContext};
use crate::uptime::UptimePlugin;
use crate::weather::WeatherPlugin;

/// File extension of a plugin unit on disk.
pub const PLUGIN_UNIT_EXTENSION: &str = "plugin";

/// The compiled-in plugins a unit file may name.
///
/// # Example
///
/// ```
/// use gateway_plugins::PluginCatalog;
///
/// let catalog = PluginCatalog::new();
/// for name in catalog.list() {
///     println!("Available: {}", name);
/// }
/// assert!(catalog.get("uptime").is_some());
/// ```
#[derive(Clone)]
pub struct PluginCatalog {
    plugins: BTreeMap<String, Arc<dyn Plugin>>,
}

impl PluginCatalog {
    /// Creates a catalog with all built-in plugins.
    pub fn new() -> Self {
        let mut catalog = Self::empty();
        catalog.register(Arc::new(UptimePlugin::new()));
        catalog.register(Arc::new(JokePlugin::new()));
        catalog.register(Arc::new(WeatherPlugin::new()));
        catalog
    }

    /// Creates an empty catalog.
    pub fn empty() -> Self {
        Self {
            plugins: BTreeMap::new(),
        }
    }

    /// Registers a plugin under its info name.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let name = plugin.info().name.clone();
        self.plugins.insert(name, plugin);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).cloned()
    }

    /// Lists all registered plugin names, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.plugins.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl Default for PluginCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// A plugin unit file found in the plugins directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginUnit {
    pub name: String,
    pub path: PathBuf,
}

/// Result of loading a batch of units into one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Units that attached successfully.
    pub loaded: Vec<String>,
    /// Units that failed, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Check that `name` is usable as a unit name: lowercase ascii letters,
/// digits, `_` and `-` only.
pub fn validate_unit_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(PluginError::InvalidUnitName(name.to_string()))
    }
}

/// Extract the unit name from a `<name>.plugin` file name.
pub fn unit_name_from_file(file_name: &str) -> Result<String> {
    let name = Path::new(file_name)
        .file_name()
        .and_then(|f| f.to_str())
        .filter(|f| *f == file_name)
        .and_then(|f| f.strip_suffix(&format!(".{}", PLUGIN_UNIT_EXTENSION)))
        .ok_or_else(|| PluginError::InvalidUnitName(file_name.to_string()))?;
    validate_unit_name(name)?;
    Ok(name.to_string())
}

/// Discovers plugin units on disk and loads them into sessions.
///
/// A unit is a `<name>.plugin` file in the plugins directory naming one of
/// the catalog's plugins. Loading a unit never executes code from disk; the
/// file only enables a compiled-in plugin.
///
/// Every operation is local to one session's [`HandlerTable`]: a unit that
/// fails to load is logged and skipped, and never stops the other units.
pub struct PluginRegistry {
    catalog: PluginCatalog,
    dir: PathBuf,
    http: reqwest::Client,
    status: Arc<RuntimeStatus>,
}

impl PluginRegistry {
    /// Creates a registry over `dir`, building the shared HTTP client with
    /// the given timeout.
    pub fn new(
        dir: impl Into<PathBuf>,
        catalog: PluginCatalog,
        status: Arc<RuntimeStatus>,
        http_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            catalog,
            dir: dir.into(),
            http: plugin_http_client(http_timeout)?,
            status,
        })
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    /// The plugins directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Context handed to plugins serving `user_id`.
    pub fn context(&self, user_id: i64) -> PluginContext {
        PluginContext::new(user_id, self.http.clone(), Arc::clone(&self.status))
    }

    fn unit_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, PLUGIN_UNIT_EXTENSION))
    }

    /// Enumerate the unit files in the plugins directory, sorted by name.
    ///
    /// A missing directory is created and yields no units. Files with other
    /// extensions are ignored.
    pub fn discover(&self) -> Result<Vec<PluginUnit>> {
        if !self.dir.exists() {
            ensure_dir(&self.dir)?;
            info!(dir = %self.dir.display(), "Created plugins directory");
            return Ok(Vec::new());
        }

        let mut units = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(PLUGIN_UNIT_EXTENSION) {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                units.push(PluginUnit {
                    name: name.to_string(),
                    path: path.clone(),
                });
            }
        }
        units.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(units)
    }

    /// Load every discovered unit into `table`.
    pub async fn load_all(&self, user_id: i64, table: &HandlerTable) -> LoadReport {
        let mut report = LoadReport::default();

        let units = match self.discover() {
            Ok(units) => units,
            Err(e) => {
                error!(user_id, error = %e, "Failed to enumerate plugin units");
                return report;
            }
        };

        for unit in units {
            match self.load_one(user_id, table, &unit.path).await {
                Ok(name) => report.loaded.push(name),
                Err(e) => {
                    error!(user_id, unit = %unit.path.display(), error = %e, "Error loading plugin");
                    report.failed.push((unit.name, e.to_string()));
                }
            }
        }

        info!(
            user_id,
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Plugins loaded"
        );
        report
    }

    /// Load one unit file into `table`, returning the plugin name.
    pub async fn load_one(&self, user_id: i64, table: &HandlerTable, unit_path: &Path) -> Result<String> {
        let file_name = unit_path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| PluginError::InvalidUnitName(unit_path.display().to_string()))?;
        let name = unit_name_from_file(file_name)?;

        let plugin = self
            .catalog
            .get(&name)
            .ok_or_else(|| PluginError::UnknownUnit(name.clone()))?;

        let ctx = self.context(user_id);
        let handlers = plugin.init(&ctx).await.map_err(|e| match e {
            PluginError::InitFailed { .. } => e,
            other => PluginError::InitFailed {
                name: name.clone(),
                reason: other.to_string(),
            },
        })?;

        if table.attach(&name, handlers).await {
            debug!(user_id, plugin = %name, "Replaced previously attached plugin");
        }
        info!(user_id, plugin = %name, "Loaded plugin");
        Ok(name)
    }

    /// Detach every plugin from `table` and load the units again.
    ///
    /// Previously attached handlers are dropped first, so repeated reloads
    /// never leave duplicates behind.
    pub async fn reload_all(&self, user_id: i64, table: &HandlerTable) -> LoadReport {
        let unloaded = self.unload_all(user_id, table).await;
        debug!(user_id, count = unloaded.len(), "Unloaded plugins before reload");
        self.load_all(user_id, table).await
    }

    /// Detach one plugin, running its cleanup hook first.
    ///
    /// Cleanup errors are logged, never returned. Returns whether the plugin
    /// was attached.
    pub async fn unload_one(&self, user_id: i64, table: &HandlerTable, name: &str) -> bool {
        if !table.contains(name).await {
            return false;
        }

        if let Some(plugin) = self.catalog.get(name) {
            let ctx = self.context(user_id);
            if let Err(e) = plugin.cleanup(&ctx).await {
                warn!(user_id, plugin = %name, error = %e, "Plugin cleanup failed");
            }
        }

        let removed = table.detach(name).await;
        if removed {
            info!(user_id, plugin = %name, "Unloaded plugin");
        }
        removed
    }

    /// Detach every plugin in `table`, returning their names.
    pub async fn unload_all(&self, user_id: i64, table: &HandlerTable) -> Vec<String> {
        let mut unloaded = Vec::new();
        for name in table.names().await {
            if self.unload_one(user_id, table, &name).await {
                unloaded.push(name);
            }
        }
        unloaded
    }

    /// Write a unit file for a catalog plugin.
    ///
    /// `file_name` must be `<name>.plugin` and `<name>` must be in the
    /// catalog. Installing an already installed unit overwrites it.
    pub fn install(&self, file_name: &str, contents: &[u8]) -> Result<PluginUnit> {
        let name = unit_name_from_file(file_name)?;
        if self.catalog.get(&name).is_none() {
            return Err(PluginError::UnknownUnit(name));
        }

        let path = self.unit_path(&name);
        atomic_write(&path, contents)?;
        info!(plugin = %name, path = %path.display(), "Installed plugin unit");
        Ok(PluginUnit { name, path })
    }

    /// Delete a unit file. Returns whether a file was removed.
    pub fn uninstall(&self, name: &str) -> Result<bool> {
        validate_unit_name(name)?;
        let removed = remove_file_if_exists(&self.unit_path(name))?;
        if removed {
            info!(plugin = %name, "Removed plugin unit");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{CommandEvent, CommandHandler, Outcome, PluginInfo, Responder};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct Noop;

    #[async_trait]
    impl CommandHandler for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn matches(&self, _text: &str) -> bool {
            false
        }

        async fn handle(&self, _event: &CommandEvent, _responder: &dyn Responder) -> Outcome {
            Outcome::Succeeded
        }
    }

    /// Test plugin that counts init/cleanup calls and can be told to fail.
    struct CountingPlugin {
        info: PluginInfo,
        fail_init: bool,
        fail_cleanup: bool,
        inits: AtomicUsize,
        cleanups: AtomicUsize,
    }

    impl CountingPlugin {
        fn new(name: &str) -> Self {
            Self {
                info: PluginInfo {
                    name: name.to_string(),
                    description: "counter".to_string(),
                    commands: vec![],
                },
                fail_init: false,
                fail_cleanup: false,
                inits: AtomicUsize::new(0),
                cleanups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Plugin for CountingPlugin {
        fn info(&self) -> &PluginInfo {
            &self.info
        }

        async fn init(&self, _ctx: &PluginContext) -> Result<Vec<Arc<dyn CommandHandler>>> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                return Err(PluginError::Http("boom".to_string()));
            }
            Ok(vec![Arc::new(Noop)])
        }

        async fn cleanup(&self, _ctx: &PluginContext) -> Result<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            if self.fail_cleanup {
                return Err(PluginError::Send("cleanup boom".to_string()));
            }
            Ok(())
        }
    }

    fn registry_with(dir: &Path, plugins: Vec<Arc<dyn Plugin>>) -> PluginRegistry {
        let mut catalog = PluginCatalog::empty();
        for plugin in plugins {
            catalog.register(plugin);
        }
        PluginRegistry::new(
            dir,
            catalog,
            Arc::new(RuntimeStatus::new()),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_catalog_has_builtins() {
        let catalog = PluginCatalog::new();
        assert_eq!(catalog.list(), vec!["joke", "uptime", "weather"]);
    }

    #[test]
    fn test_unit_name_from_file() {
        assert_eq!(unit_name_from_file("weather.plugin").unwrap(), "weather");
        assert!(unit_name_from_file("weather.py").is_err());
        assert!(unit_name_from_file("../evil.plugin").is_err());
        assert!(unit_name_from_file("Bad Name.plugin").is_err());
        assert!(unit_name_from_file(".plugin").is_err());
    }

    #[test]
    fn test_discover_creates_missing_dir() {
        let dir = tempdir().unwrap();
        let plugins_dir = dir.path().join("plugins");
        let registry = registry_with(&plugins_dir, vec![]);

        assert!(registry.discover().unwrap().is_empty());
        assert!(plugins_dir.is_dir());
    }

    #[test]
    fn test_discover_ignores_other_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.plugin"), "").unwrap();
        std::fs::write(dir.path().join("a.plugin"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        let registry = registry_with(dir.path(), vec![]);

        let names: Vec<_> = registry.discover().unwrap().into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failing_plugin_does_not_block_others() {
        let dir = tempdir().unwrap();
        let mut broken = CountingPlugin::new("broken");
        broken.fail_init = true;
        let registry = registry_with(
            dir.path(),
            vec![Arc::new(broken), Arc::new(CountingPlugin::new("good"))],
        );
        registry.install("broken.plugin", b"").unwrap();
        registry.install("good.plugin", b"").unwrap();
        std::fs::write(dir.path().join("missing.plugin"), "").unwrap();

        let table = HandlerTable::new();
        let report = registry.load_all(1, &table).await;

        assert_eq!(report.loaded, vec!["good".to_string()]);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(table.names().await, vec!["good".to_string()]);
    }

    #[tokio::test]
    async fn test_reload_does_not_duplicate() {
        let dir = tempdir().unwrap();
        let counter = Arc::new(CountingPlugin::new("counter"));
        let registry = registry_with(dir.path(), vec![counter.clone()]);
        registry.install("counter.plugin", b"").unwrap();

        let table = HandlerTable::new();
        registry.load_all(1, &table).await;
        registry.reload_all(1, &table).await;
        registry.reload_all(1, &table).await;

        assert_eq!(table.len().await, 1);
        assert_eq!(counter.inits.load(Ordering::SeqCst), 3);
        assert_eq!(counter.cleanups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unload_swallows_cleanup_errors() {
        let dir = tempdir().unwrap();
        let mut counter = CountingPlugin::new("counter");
        counter.fail_cleanup = true;
        let registry = registry_with(dir.path(), vec![Arc::new(counter)]);
        registry.install("counter.plugin", b"").unwrap();

        let table = HandlerTable::new();
        registry.load_all(1, &table).await;

        assert!(registry.unload_one(1, &table, "counter").await);
        assert!(!registry.unload_one(1, &table, "counter").await);
        assert!(table.is_empty().await);
    }

    #[test]
    fn test_install_rejects_unknown_plugin() {
        let dir = tempdir().unwrap();
        let registry = registry_with(dir.path(), vec![Arc::new(CountingPlugin::new("counter"))]);

        assert!(matches!(
            registry.install("other.plugin", b""),
            Err(PluginError::UnknownUnit(_))
        ));
        assert!(matches!(
            registry.install("counter.exe", b""),
            Err(PluginError::InvalidUnitName(_))
        ));
    }

    #[test]
    fn test_install_and_uninstall() {
        let dir = tempdir().unwrap();
        let registry = registry_with(dir.path(), vec![Arc::new(CountingPlugin::new("counter"))]);

        let unit = registry.install("counter.plugin", b"enabled").unwrap();
        assert_eq!(unit.path, dir.path().join("counter.plugin"));
        assert!(registry.uninstall("counter").unwrap());
        assert!(!registry.uninstall("counter").unwrap());
    }
}
