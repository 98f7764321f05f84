//! Command-line arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use portall_core::config::{DEFAULT_DATABASE_URL, DEFAULT_LOCK_STALE_SECS, DEFAULT_MIGRATIONS_DIR};
use portall_core::snapshot::DEFAULT_SHADOW_PREFIX;
use portall_core::BootstrapConfig;

/// Portall schema bootstrap and migrations.
#[derive(Parser, Debug)]
#[command(name = "portall-migrate")]
#[command(version, about = "Portall schema bootstrap and migrations", long_about = None)]
pub struct Args {
    /// Database connection string (sqlite:///path.db or postgres://...).
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL, global = true)]
    pub database_url: String,

    /// Migration store directory.
    #[arg(long, env = "PORTALL_MIGRATIONS_DIR", default_value = DEFAULT_MIGRATIONS_DIR, global = true)]
    pub migrations_dir: PathBuf,

    /// Prefix for shadow tables taken before an upgrade.
    #[arg(long, default_value = DEFAULT_SHADOW_PREFIX, global = true)]
    pub shadow_prefix: String,

    /// Age in seconds after which a bootstrap lock is taken over. 0 never takes over.
    #[arg(long, default_value_t = DEFAULT_LOCK_STALE_SECS, global = true)]
    pub lock_stale_secs: u64,

    /// Skip re-checking the schema after an upgrade.
    #[arg(long, global = true)]
    pub no_verify: bool,

    /// Command to run (default: bootstrap).
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create, verify or upgrade the schema as needed.
    Bootstrap,
    /// Show schema compatibility and migration state.
    Status,
    /// Generate a migration step from the live schema.
    Revision {
        /// Step description.
        #[arg(short, long)]
        message: String,
    },
    /// Apply pending steps behind a snapshot.
    Upgrade,
    /// Mark the chain tip as applied without running it.
    Stamp,
}

impl Args {
    /// The selected command.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Bootstrap)
    }

    /// Convert command-line arguments to bootstrap configuration.
    pub fn into_config(self) -> BootstrapConfig {
        let config = BootstrapConfig::new(self.database_url)
            .with_migrations_dir(self.migrations_dir)
            .with_shadow_prefix(self.shadow_prefix)
            .with_verify_after_upgrade(!self.no_verify);

        if self.lock_stale_secs == 0 {
            config.without_lock_takeover()
        } else {
            config.with_lock_stale_after(Duration::from_secs(self.lock_stale_secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_bootstrap() {
        let args = Args::try_parse_from(["portall-migrate", "--database-url", "sqlite://"]).unwrap();
        assert_eq!(args.command(), Command::Bootstrap);
        assert_eq!(args.shadow_prefix, "temp_");
        assert_eq!(args.lock_stale_secs, 600);
    }

    #[test]
    fn test_revision_requires_message() {
        assert!(Args::try_parse_from(["portall-migrate", "revision"]).is_err());
        let args =
            Args::try_parse_from(["portall-migrate", "revision", "-m", "add description"]).unwrap();
        assert_eq!(
            args.command(),
            Command::Revision {
                message: "add description".to_string()
            }
        );
    }

    #[test]
    fn test_into_config() {
        let args = Args::try_parse_from([
            "portall-migrate",
            "upgrade",
            "--database-url",
            "sqlite:///data/portall.db",
            "--migrations-dir",
            "/data/migrations",
            "--shadow-prefix",
            "bak_",
            "--lock-stale-secs",
            "0",
            "--no-verify",
        ])
        .unwrap();
        assert_eq!(args.command(), Command::Upgrade);

        let config = args.into_config();
        assert_eq!(config.database_url, "sqlite:///data/portall.db");
        assert_eq!(config.migrations_dir, PathBuf::from("/data/migrations"));
        assert_eq!(config.shadow_prefix, "bak_");
        assert!(config.lock_stale_after.is_none());
        assert!(!config.verify_after_upgrade);
    }

    #[test]
    fn test_lock_stale_secs() {
        let config = Args::try_parse_from(["portall-migrate", "--lock-stale-secs", "30"])
            .unwrap()
            .into_config();
        assert_eq!(config.lock_stale_after, Some(Duration::from_secs(30)));
    }
}
