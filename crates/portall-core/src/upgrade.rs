//! Safe upgrade orchestration.
//!
//! Runs pending migration steps against a populated database behind a
//! shadow-table snapshot:
//!
//! ```text
//! Snapshotting -> Migrating -> Reconciling -> CleaningUp -> Done
//!                     |
//!                     +-> RestoringThenFail
//! ```
//!
//! A snapshot failure aborts before any schema change. A migration failure
//! restores the snapshot and re-raises the migration error. No phase is
//! revisited and nothing is retried.
//!
//! Shadows of tables whose data could not be carried over survive cleanup.

use thiserror::Error;
use tracing::{error, info, warn};

use crate::engine::LiveDatabase;
use crate::migration::{ApplyReport, MigrationError, MigrationStore};
use crate::reconcile::{DataReconciler, ReconcileReport};
use crate::snapshot::{CleanupReport, RestoreReport, SnapshotError, TempTableManager};

/// Orchestrator phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradePhase {
    /// Copying live tables into shadows.
    Snapshotting,
    /// Applying pending migration steps.
    Migrating,
    /// Refilling migrated tables from their shadows.
    Reconciling,
    /// Dropping shadows.
    CleaningUp,
    /// Putting the snapshot back after a failed migration.
    RestoringThenFail,
    /// Upgrade finished.
    Done,
}

impl std::fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UpgradePhase::Snapshotting => "snapshotting",
            UpgradePhase::Migrating => "migrating",
            UpgradePhase::Reconciling => "reconciling",
            UpgradePhase::CleaningUp => "cleaning_up",
            UpgradePhase::RestoringThenFail => "restoring_then_fail",
            UpgradePhase::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// Result of a successful upgrade.
#[derive(Debug, Clone, Default)]
pub struct UpgradeReport {
    /// Phases visited, in order.
    pub phases: Vec<UpgradePhase>,
    /// Per-step migration results.
    pub apply: ApplyReport,
    /// Per-table data reconciliation results.
    pub reconcile: ReconcileReport,
    /// Per-shadow cleanup results.
    pub cleanup: CleanupReport,
    /// Shadows kept because their rows did not fit the migrated table.
    pub retained: Vec<String>,
}

impl UpgradeReport {
    fn enter(&mut self, phase: UpgradePhase) {
        info!(%phase, "upgrade phase");
        self.phases.push(phase);
    }
}

/// Terminal upgrade failure.
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// The migration state could not be read; nothing was changed.
    #[error("cannot read migration state: {0}")]
    State(#[source] MigrationError),

    /// The snapshot failed; no schema change was made.
    #[error("upgrade aborted before any change: {source}")]
    AbortedBeforeChange {
        /// Snapshot failure.
        #[source]
        source: SnapshotError,
    },

    /// The migration failed and the snapshot was restored.
    #[error("migration failed, snapshot restored: {source}")]
    FailedRestored {
        /// The original migration failure.
        #[source]
        source: MigrationError,
        /// Per-table restore results.
        restore: RestoreReport,
        /// Cleanup of shadows whose restore did not need them anymore.
        cleanup: CleanupReport,
        /// Phases visited, in order.
        phases: Vec<UpgradePhase>,
    },
}

/// Applies pending steps to a populated database behind a snapshot.
pub struct SafeUpgradeOrchestrator<'a> {
    store: &'a MigrationStore,
    tables: TempTableManager,
}

impl<'a> SafeUpgradeOrchestrator<'a> {
    /// Create an orchestrator over `store`, shadowing tables with `tables`.
    pub fn new(store: &'a MigrationStore, tables: TempTableManager) -> Self {
        Self { store, tables }
    }

    /// Run the upgrade to completion or to a terminal failure.
    pub fn run(&self, db: &dyn LiveDatabase) -> Result<UpgradeReport, UpgradeError> {
        let applied_before = self.store.applied().map_err(UpgradeError::State)?;
        let mut report = UpgradeReport::default();

        report.enter(UpgradePhase::Snapshotting);
        let set = self.tables.snapshot(db).map_err(|source| {
            error!(error = %source, "snapshot failed, upgrade aborted");
            UpgradeError::AbortedBeforeChange { source }
        })?;

        report.enter(UpgradePhase::Migrating);
        match self.store.apply(db) {
            Ok(apply) => report.apply = apply,
            Err(source) => {
                error!(error = %source, "migration failed, restoring snapshot");
                report.enter(UpgradePhase::RestoringThenFail);

                let restore = self.tables.restore(db, &set);
                let retained = restore.failed_tables();
                if !retained.is_empty() {
                    error!(tables = ?retained, "restore incomplete, keeping shadow tables");
                }
                let cleanup = self.tables.cleanup(db, &set.without(&retained));

                // The restored schema predates every step of this run.
                if let Err(e) = self.store.stamp_to(applied_before.as_deref()) {
                    error!(error = %e, "failed to reset migration marker after restore");
                }

                return Err(UpgradeError::FailedRestored {
                    source,
                    restore,
                    cleanup,
                    phases: report.phases,
                });
            }
        }

        report.enter(UpgradePhase::Reconciling);
        report.reconcile = DataReconciler::reconcile(db, &set);

        report.enter(UpgradePhase::CleaningUp);
        let unreconciled = report.reconcile.unreconciled_tables();
        report.retained = unreconciled
            .iter()
            .filter_map(|table| set.shadow_of(table).map(str::to_string))
            .collect();
        if !report.retained.is_empty() {
            warn!(shadows = ?report.retained, "data not carried over, keeping shadow tables");
        }
        report.cleanup = self.tables.cleanup(db, &set.without(&unreconciled));

        report.enter(UpgradePhase::Done);
        Ok(report)
    }
}
