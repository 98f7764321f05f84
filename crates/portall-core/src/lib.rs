//! Portall Core - Startup schema bootstrap and safe migrations.
//!
//! This crate brings a live relational database in line with a declared
//! [`ModelSchema`] when the application starts: it creates a fresh database,
//! leaves a compatible one alone, or snapshots, migrates and reconciles an
//! incompatible one, restoring the snapshot if the migration fails.

pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod inspect;
pub mod lock;
pub mod migration;
pub mod reconcile;
pub mod snapshot;
pub mod upgrade;

mod util;

pub use bootstrap::{BootstrapController, BootstrapError, BootstrapOutcome};
pub use catalog::{ColumnDef, ColumnType, DefaultValue, ModelSchema, TableSchema};
pub use config::{BootstrapConfig, ConfigError};
pub use engine::{open, DatabaseUrl, Dialect, LiveDatabase, Opened, SqliteDatabase};
pub use error::Error;
pub use inspect::{Compatibility, CompatibilityReport, SchemaInspector, TableDrift};
pub use lock::{BootstrapLock, LockError};
pub use migration::{ApplyReport, MigrationError, MigrationStep, MigrationStore, StepOutcome};
pub use reconcile::{DataReconciler, ReconcileOutcome, ReconcileReport};
pub use snapshot::{
    CleanupReport, RestoreReport, SnapshotError, TempTableManager, TempTableSet, TableOutcome,
};
pub use upgrade::{SafeUpgradeOrchestrator, UpgradeError, UpgradePhase, UpgradeReport};
pub use util::{current_timestamp, quote_ident, quote_list};

#[cfg(feature = "postgres")]
pub use engine::PostgresDatabase;
