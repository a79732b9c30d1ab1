//! Command plugins for userbot sessions.
//!
//! This crate provides the interface plugins implement, the per-session table
//! their handlers are attached to, and the registry that discovers plugin
//! units on disk and loads them into a session.
//!
//! # Key Concepts
//!
//! - **Plugin**: compiled-in unit that contributes command handlers
//! - **PluginCatalog**: the plugins a unit file is allowed to name
//! - **PluginRegistry**: discovers `<name>.plugin` units and loads them
//! - **HandlerTable**: a session's attached handlers, keyed by plugin name
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use gateway_core::RuntimeStatus;
//! use gateway_plugins::{HandlerTable, PluginCatalog, PluginRegistry};
//!
//! # async fn run() -> gateway_plugins::Result<()> {
//! let registry = PluginRegistry::new(
//!     "/home/user/.userbot-gateway/plugins",
//!     PluginCatalog::new(),
//!     Arc::new(RuntimeStatus::new()),
//!     Duration::from_secs(15),
//! )?;
//!
//! let table = HandlerTable::new();
//! let report = registry.load_all(42, &table).await;
//! println!("loaded {:?}, failed {:?}", report.loaded, report.failed);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod joke;
pub mod registry;
pub mod table;
pub mod traits;
pub mod uptime;
pub mod weather;

pub use error::{PluginError, Result};
pub use joke::JokePlugin;
pub use registry::{
    unit_name_from_file, validate_unit_name, LoadReport, PluginCatalog, PluginRegistry, PluginUnit,
    PLUGIN_UNIT_EXTENSION,
};
pub use table::HandlerTable;
pub use traits::{
    plugin_http_client, CommandEvent, CommandHandler, HandlerRun, Outcome, Plugin, PluginContext,
    PluginInfo, Responder,
};
pub use uptime::UptimePlugin;
pub use weather::WeatherPlugin;
