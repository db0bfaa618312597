//! storysync core library — domain types, configuration, backups, errors.
//!
//! Public API surface:
//! - [`types`] — entity keys, snapshots, local story declarations
//! - [`error`] — [`CoreError`], [`ConfigError`]
//! - [`config`] — load / save / validate `~/.storysync/config.yaml`
//! - [`backup_store`] — persisted point-in-time epic snapshots

pub mod backup_store;
pub mod config;
pub mod error;
pub mod types;

pub use config::StorysyncConfig;
pub use error::{ConfigError, CoreError};
pub use types::{
    Backup, Description, EntityKey, EntitySnapshot, Story, StoryDocument, Subtask,
};
