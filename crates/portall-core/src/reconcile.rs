//! Post-migration data reconciliation.
//!
//! After the schema has been migrated, each live table is refilled from its
//! shadow, restricted to the columns both sides share.

use std::collections::BTreeSet;

use tracing::{error, info, warn};

use crate::engine::LiveDatabase;
use crate::error::Error;
use crate::snapshot::TempTableSet;
use crate::{quote_ident, quote_list};

/// What happened to one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Rows copied over the common columns.
    Copied {
        /// Rows now in the live table.
        rows: u64,
        /// Columns copied, in live declaration order.
        columns: Vec<String>,
    },
    /// The migration removed the table; its old data is gone with it.
    MissingTable,
    /// Shadow and live table share no column.
    NoCommonColumns,
    /// A constraint rejected the copied rows; the table was left as migrated.
    IntegrityViolation(String),
    /// Any other database failure; the table was left as migrated.
    Failed(String),
}

impl ReconcileOutcome {
    /// Whether the table's data was carried over.
    pub fn is_copied(&self) -> bool {
        matches!(self, ReconcileOutcome::Copied { .. })
    }
}

/// Per-table reconciliation results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// `(table, outcome)` in table-name order.
    pub tables: Vec<(String, ReconcileOutcome)>,
}

impl ReconcileReport {
    /// Outcome for `table`.
    pub fn outcome(&self, table: &str) -> Option<&ReconcileOutcome> {
        self.tables
            .iter()
            .find(|(t, _)| t == table)
            .map(|(_, outcome)| outcome)
    }

    /// Number of tables whose data was carried over.
    pub fn copied_count(&self) -> usize {
        self.tables.iter().filter(|(_, o)| o.is_copied()).count()
    }

    /// Tables whose copy was rejected or failed. Their old rows exist only
    /// in the shadow.
    pub fn unreconciled_tables(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|(_, o)| {
                matches!(
                    o,
                    ReconcileOutcome::IntegrityViolation(_) | ReconcileOutcome::Failed(_)
                )
            })
            .map(|(t, _)| t.clone())
            .collect()
    }
}

/// Copies snapshot data into the migrated schema.
pub struct DataReconciler;

impl DataReconciler {
    /// Refill every snapshotted table from its shadow.
    ///
    /// Never fails as a whole: each table gets its own outcome and its own
    /// transaction.
    pub fn reconcile(db: &dyn LiveDatabase, set: &TempTableSet) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for (table, shadow) in set.iter() {
            let outcome = match Self::reconcile_table(db, table, shadow) {
                Ok(outcome) => outcome,
                Err(e) if e.is_integrity() => {
                    error!(table = %table, error = %e, "integrity violation while restoring data, table skipped");
                    ReconcileOutcome::IntegrityViolation(e.to_string())
                }
                Err(e) => {
                    warn!(table = %table, error = %e, "failed to restore data, table skipped");
                    ReconcileOutcome::Failed(e.to_string())
                }
            };
            report.tables.push((table.to_string(), outcome));
        }

        info!(
            tables = report.tables.len(),
            copied = report.copied_count(),
            "reconciliation finished"
        );
        report
    }

    fn reconcile_table(
        db: &dyn LiveDatabase,
        table: &str,
        shadow: &str,
    ) -> Result<ReconcileOutcome, Error> {
        if !db.has_table(table)? {
            warn!(table = %table, "table no longer exists after migration, its data is dropped");
            return Ok(ReconcileOutcome::MissingTable);
        }

        let shadow_columns: BTreeSet<String> =
            db.columns(shadow)?.into_iter().map(|c| c.name).collect();
        let common: Vec<String> = db
            .columns(table)?
            .into_iter()
            .map(|c| c.name)
            .filter(|name| shadow_columns.contains(name))
            .collect();

        if common.is_empty() {
            warn!(table = %table, "no common columns between snapshot and migrated table");
            return Ok(ReconcileOutcome::NoCommonColumns);
        }

        let columns = quote_list(&common);
        db.execute_in_transaction(&[
            format!("DELETE FROM {}", quote_ident(table)),
            format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                quote_ident(table),
                columns,
                columns,
                quote_ident(shadow)
            ),
        ])?;

        let rows = db.row_count(table)?;
        info!(table = %table, rows, columns = common.len(), "restored table data");
        Ok(ReconcileOutcome::Copied {
            rows,
            columns: common,
        })
    }
}
