//! Live schema inspection and compatibility classification.

use std::collections::BTreeSet;

use tracing::debug;

use crate::catalog::{ModelSchema, TableSchema};
use crate::engine::LiveDatabase;
use crate::error::Error;

/// Classification of a live database against the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    /// The database holds no user tables.
    Missing,
    /// Every model table exists with the same column names.
    Compatible,
    /// At least one model table is absent or has different column names.
    Incompatible,
}

impl std::fmt::Display for Compatibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compatibility::Missing => write!(f, "missing"),
            Compatibility::Compatible => write!(f, "compatible"),
            Compatibility::Incompatible => write!(f, "incompatible"),
        }
    }
}

/// How one model table differs from the live database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableDrift {
    /// The table does not exist live.
    Absent {
        /// Table name.
        table: String,
    },
    /// The table exists with a different column-name set.
    Columns {
        /// Table name.
        table: String,
        /// Model columns missing live.
        missing: Vec<String>,
        /// Live columns not in the model.
        extra: Vec<String>,
    },
}

impl TableDrift {
    /// Name of the drifted table.
    pub fn table(&self) -> &str {
        match self {
            TableDrift::Absent { table } | TableDrift::Columns { table, .. } => table,
        }
    }
}

impl std::fmt::Display for TableDrift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableDrift::Absent { table } => write!(f, "{}: table absent", table),
            TableDrift::Columns {
                table,
                missing,
                extra,
            } => write!(
                f,
                "{}: missing columns [{}], extra columns [{}]",
                table,
                missing.join(", "),
                extra.join(", ")
            ),
        }
    }
}

/// Result of classifying a live database. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityReport {
    /// Overall classification.
    pub status: Compatibility,
    /// Drifted tables; empty unless `status` is `Incompatible`.
    pub drift: Vec<TableDrift>,
}

impl CompatibilityReport {
    /// Whether no migration is needed.
    pub fn is_compatible(&self) -> bool {
        self.status == Compatibility::Compatible
    }
}

/// Reads live metadata and compares it with the model. Read-only.
pub struct SchemaInspector;

impl SchemaInspector {
    /// Classify the live database against `model`.
    ///
    /// Unreachable storage is reported as [`Error::ConnectionUnavailable`],
    /// never as `Missing`.
    pub fn classify(
        db: &dyn LiveDatabase,
        model: &ModelSchema,
    ) -> Result<CompatibilityReport, Error> {
        let live_tables: BTreeSet<String> = db.table_names()?.into_iter().collect();
        if live_tables.is_empty() {
            return Ok(CompatibilityReport {
                status: Compatibility::Missing,
                drift: Vec::new(),
            });
        }

        let mut drift = Vec::new();
        for (name, table) in &model.tables {
            if !live_tables.contains(name) {
                drift.push(TableDrift::Absent {
                    table: name.clone(),
                });
                continue;
            }

            let live_columns: BTreeSet<String> =
                db.columns(name)?.into_iter().map(|c| c.name).collect();
            let model_columns: BTreeSet<String> =
                table.columns.iter().map(|c| c.name.clone()).collect();

            if live_columns != model_columns {
                drift.push(TableDrift::Columns {
                    table: name.clone(),
                    missing: model_columns.difference(&live_columns).cloned().collect(),
                    extra: live_columns.difference(&model_columns).cloned().collect(),
                });
            }
        }

        let status = if drift.is_empty() {
            Compatibility::Compatible
        } else {
            Compatibility::Incompatible
        };
        debug!(%status, drifted = drift.len(), "classified live schema");

        Ok(CompatibilityReport { status, drift })
    }

    /// Observe the live schema as a [`ModelSchema`].
    pub fn observe(db: &dyn LiveDatabase) -> Result<ModelSchema, Error> {
        let mut schema = ModelSchema::new();
        for name in db.table_names()? {
            let columns = db.columns(&name)?;
            schema = schema.with_table(TableSchema { name, columns });
        }
        Ok(schema)
    }
}
