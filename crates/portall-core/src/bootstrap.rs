//! Startup schema bootstrap.
//!
//! Run once per process start, before the application serves requests:
//!
//! 1. Open the database. Unreachable storage is fatal; a new or empty
//!    database takes the create path.
//! 2. Claim the bootstrap lock.
//! 3. Empty database: create every model table and stamp the chain tip.
//! 4. Compatible database: nothing to do.
//! 5. Incompatible database: make sure a step covers the drift, then run
//!    the safe upgrade.
//! 6. Release the lock.

use thiserror::Error;
use tracing::{error, info, warn};

use crate::catalog::ModelSchema;
use crate::config::{BootstrapConfig, ConfigError};
use crate::engine::{self, LiveDatabase};
use crate::inspect::{Compatibility, CompatibilityReport, SchemaInspector};
use crate::lock::{BootstrapLock, LockError};
use crate::migration::{MigrationError, MigrationStore};
use crate::snapshot::TempTableManager;
use crate::upgrade::{SafeUpgradeOrchestrator, UpgradeError, UpgradeReport};

/// Message of steps generated from live drift during bootstrap.
pub const AUTO_REVISION_MESSAGE: &str = "auto-generated from schema drift";

/// Bootstrap errors. All are fatal to startup.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The database could not be opened, inspected or created.
    #[error("database error: {0}")]
    Database(#[from] crate::error::Error),

    /// Another bootstrap holds the lock, or the lock could not be managed.
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// The migration store could not be read or written.
    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),

    /// The safe upgrade reached a failed terminal state.
    #[error("upgrade error: {0}")]
    Upgrade(#[from] UpgradeError),
}

/// What bootstrap did.
#[derive(Debug)]
pub enum BootstrapOutcome {
    /// The database was empty; the schema was created and stamped.
    Created {
        /// Revision the marker now points at.
        revision: Option<String>,
    },
    /// The schema already matched the model.
    Compatible,
    /// The schema was migrated.
    Upgraded(UpgradeReport),
}

impl std::fmt::Display for BootstrapOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapOutcome::Created { revision } => write!(
                f,
                "created schema at revision {}",
                revision.as_deref().unwrap_or("<none>")
            ),
            BootstrapOutcome::Compatible => write!(f, "schema compatible, nothing to do"),
            BootstrapOutcome::Upgraded(report) => write!(
                f,
                "upgraded schema ({} steps applied, {} tables reconciled)",
                report.apply.applied_count(),
                report.reconcile.copied_count()
            ),
        }
    }
}

/// Brings the live database in line with the model at startup.
pub struct BootstrapController<'a> {
    config: &'a BootstrapConfig,
}

impl<'a> BootstrapController<'a> {
    /// Create a controller for `config`.
    pub fn new(config: &'a BootstrapConfig) -> Self {
        Self { config }
    }

    /// Open the configured database and bootstrap it.
    pub fn run(&self, model: &ModelSchema) -> Result<BootstrapOutcome, BootstrapError> {
        let url = self.config.validate()?;
        let opened = engine::open(&url).map_err(|e| {
            error!(url = %url, error = %e, "database unavailable");
            e
        })?;
        info!(url = %url, existed = opened.existed, "opened database");
        self.run_on(opened.database.as_ref(), model)
    }

    /// Bootstrap an already opened database.
    pub fn run_on(
        &self,
        db: &dyn LiveDatabase,
        model: &ModelSchema,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        let lock = BootstrapLock::acquire(db, self.config.lock_stale_after)?;
        let result = self.run_locked(db, model);
        if let Err(e) = lock.release(db) {
            warn!(error = %e, "failed to release bootstrap lock");
        }

        match &result {
            Ok(outcome) => info!(%outcome, "bootstrap finished"),
            Err(e) => error!(error = %e, "bootstrap failed"),
        }
        result
    }

    fn run_locked(
        &self,
        db: &dyn LiveDatabase,
        model: &ModelSchema,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        let store = MigrationStore::new(&self.config.migrations_dir);
        let report = SchemaInspector::classify(db, model)?;
        info!(status = %report.status, "classified database");

        match report.status {
            Compatibility::Missing => self.create(db, &store, model),
            Compatibility::Compatible => {
                store.initialize()?;
                Ok(BootstrapOutcome::Compatible)
            }
            Compatibility::Incompatible => self.upgrade(db, &store, model, &report),
        }
    }

    fn create(
        &self,
        db: &dyn LiveDatabase,
        store: &MigrationStore,
        model: &ModelSchema,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        info!(tables = model.len(), "database is empty, creating schema");
        let statements: Vec<String> = model
            .tables
            .values()
            .map(|table| table.create_sql(db.dialect()))
            .collect();
        db.execute_in_transaction(&statements)?;

        store.initialize()?;
        if store.head()?.is_none() && !model.is_empty() {
            store.generate_initial(model)?;
        }
        let revision = store.stamp()?;
        Ok(BootstrapOutcome::Created { revision })
    }

    fn upgrade(
        &self,
        db: &dyn LiveDatabase,
        store: &MigrationStore,
        model: &ModelSchema,
        report: &CompatibilityReport,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        for drift in &report.drift {
            info!(%drift, "schema drift");
        }

        store.initialize()?;
        let mut generated = None;
        if store.pending()?.is_empty() {
            // Only model tables take part; unrelated live tables are kept.
            let mut live = SchemaInspector::observe(db)?;
            live.tables.retain(|name, _| model.has_table(name));
            match store.generate_revision(&live, model, AUTO_REVISION_MESSAGE)? {
                Some(step) => {
                    info!(step_id = %step.id, summary = %step.summary(), "generated step for drift");
                    generated = Some(step.id);
                }
                None => warn!("drift detected but no step could be generated"),
            }
        }

        let tables = TempTableManager::new(self.config.shadow_prefix.clone());
        let upgrade = match SafeUpgradeOrchestrator::new(store, tables).run(db) {
            Ok(upgrade) => upgrade,
            Err(e) => {
                // The step was never applied; the next run diffs afresh.
                if let Some(step_id) = &generated {
                    if let Err(discard) = store.discard_tip(step_id) {
                        warn!(step_id = %step_id, error = %discard, "failed to discard generated step");
                    }
                }
                return Err(e.into());
            }
        };

        if self.config.verify_after_upgrade {
            let after = SchemaInspector::classify(db, model)?;
            if !after.is_compatible() {
                for drift in &after.drift {
                    warn!(%drift, "schema still differs from the model after upgrade");
                }
            }
        }

        Ok(BootstrapOutcome::Upgraded(upgrade))
    }
}
