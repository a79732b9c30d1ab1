//! Persistence layer for the userbot gateway.
//!
//! This crate provides crash-safe persistence for gateway state using
//! atomic file operations (write to temp file, then rename).
//!
//! Two kinds of durable state live here:
//!
//! - the **credential store** (`users.json`): user identity to API key pair
//! - the per-user **credential blobs** (`sessions/user_<id>.session`), opaque
//!   files uploaded by users during onboarding
//!
//! # Example
//!
//! ```no_run
//! use gateway_persistence::{ApiKeyPair, CredentialStore};
//!
//! let store = CredentialStore::new("/home/user/.userbot-gateway");
//!
//! let keys = ApiKeyPair::new(12345, "0123456789abcdef");
//! store.save([(42, &keys)]).unwrap();
//!
//! let records = store.load().unwrap();
//! assert_eq!(records.get(&42), Some(&keys));
//! ```

pub mod atomic;
pub mod credential_store;
pub mod error;

pub use credential_store::{ApiKeyPair, CredentialStore, CREDENTIAL_FILE_EXTENSION};
pub use error::{PersistenceError, Result};
