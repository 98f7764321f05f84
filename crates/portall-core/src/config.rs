//! Bootstrap configuration.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::engine::DatabaseUrl;
use crate::snapshot::DEFAULT_SHADOW_PREFIX;

/// Default connection string.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:///portall.db";

/// Default migration store directory.
pub const DEFAULT_MIGRATIONS_DIR: &str = "./migrations";

/// Default age after which a bootstrap lock is considered abandoned.
pub const DEFAULT_LOCK_STALE_SECS: u64 = 600;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The connection string could not be parsed.
    #[error("invalid database url: {0}")]
    DatabaseUrl(String),

    /// The shadow prefix is empty or not a plain identifier prefix.
    #[error("invalid shadow prefix '{0}': must be non-empty ASCII letters, digits or '_'")]
    ShadowPrefix(String),

    /// The migrations directory path is empty.
    #[error("migrations directory must not be empty")]
    MigrationsDir,
}

/// Bootstrap configuration, passed by reference to every component.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Connection string; the scheme selects the engine.
    pub database_url: String,

    /// Root of the migration store.
    pub migrations_dir: PathBuf,

    /// Prefix for shadow table names.
    pub shadow_prefix: String,

    /// Age after which a lock claim is taken over. None never takes over.
    pub lock_stale_after: Option<Duration>,

    /// Re-classify after an upgrade and log residual drift.
    pub verify_after_upgrade: bool,
}

impl BootstrapConfig {
    /// Create a configuration for `database_url` with defaults elsewhere.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            shadow_prefix: DEFAULT_SHADOW_PREFIX.to_string(),
            lock_stale_after: Some(Duration::from_secs(DEFAULT_LOCK_STALE_SECS)),
            verify_after_upgrade: true,
        }
    }

    /// Set the migration store directory.
    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Set the shadow table prefix.
    pub fn with_shadow_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.shadow_prefix = prefix.into();
        self
    }

    /// Set the stale-lock age.
    pub fn with_lock_stale_after(mut self, age: Duration) -> Self {
        self.lock_stale_after = Some(age);
        self
    }

    /// Never take over a lock claim.
    pub fn without_lock_takeover(mut self) -> Self {
        self.lock_stale_after = None;
        self
    }

    /// Enable or disable the post-upgrade check.
    pub fn with_verify_after_upgrade(mut self, verify: bool) -> Self {
        self.verify_after_upgrade = verify;
        self
    }

    /// Validate the configuration and parse the connection string.
    pub fn validate(&self) -> Result<DatabaseUrl, ConfigError> {
        if self.migrations_dir.as_os_str().is_empty() {
            return Err(ConfigError::MigrationsDir);
        }
        if self.shadow_prefix.is_empty()
            || !self
                .shadow_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::ShadowPrefix(self.shadow_prefix.clone()));
        }
        self.database_url
            .parse::<DatabaseUrl>()
            .map_err(|e| ConfigError::DatabaseUrl(e.to_string()))
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASE_URL)
    }
}
