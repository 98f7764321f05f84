//! CLI error types.

use portall_core::migration::MigrationError;
use portall_core::{BootstrapError, ConfigError, LockError, UpgradeError};
use thiserror::Error;

/// CLI errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Bootstrap failed.
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] portall_core::Error),

    /// Migration store error.
    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),

    /// Upgrade failed.
    #[error("upgrade failed: {0}")]
    Upgrade(#[from] UpgradeError),

    /// A revision was requested while steps are still pending.
    #[error("database is not up to date: {pending} pending steps")]
    NotUpToDate {
        /// Number of pending steps.
        pending: usize,
    },

    /// Bootstrap lock error.
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
}
