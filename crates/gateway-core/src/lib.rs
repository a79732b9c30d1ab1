//! Gateway Core - shared building blocks for the userbot gateway.
//!
//! - **config**: Data directory layout and environment settings
//! - **status**: Global control flags and the status snapshot given to plugins
//! - **chunk**: Splitting long replies into message-sized chunks

pub mod chunk;
pub mod config;
pub mod status;

pub use chunk::{split_message, CHUNK_DELAY_MS, MAX_MESSAGE_LENGTH};
pub use config::{data_dir, env_file_in, plugins_dir_in, GatewaySettings};
pub use status::{format_uptime, RuntimeStatus, StatusSnapshot};
