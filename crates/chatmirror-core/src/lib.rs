//! chatmirror-core: local mirror of a session-based messaging account
//!
//! This crate provides the persistent store (schema, migrations, idempotent
//! upserts, full-text search), the inbound event model, and the
//! canonicalizer that turns raw events into stored messages.

pub mod canonical;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod jid;
pub mod migrations;
pub mod models;
pub mod paths;

pub use config::Config;
pub use db::Store;
pub use error::Error;
pub use error::Result;

/// Application name used for config directories and paths.
pub const APP_NAME: &str = "chatmirror";

/// Returns the environment variable prefix for this application.
pub fn env_prefix() -> String {
    "CHATMIRROR".to_string()
}
