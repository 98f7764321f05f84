//! Schema diffing.
//!
//! Compares two [`ModelSchema`]s and produces the structural changes needed to
//! turn the first into the second. Only names matter: a column present on both
//! sides is unchanged even if its type differs.

use crate::catalog::{ColumnDef, ModelSchema, TableSchema};
use std::collections::HashSet;

/// Complete diff between two schemas.
#[derive(Debug, Clone, Default)]
pub struct SchemaDiff {
    /// Changes to tables, sorted by table name within each kind.
    pub table_changes: Vec<TableChange>,
}

/// A change to one table.
#[derive(Debug, Clone, PartialEq)]
pub enum TableChange {
    /// Table present only in the target.
    Added(TableSchema),
    /// Table present only in the source.
    Removed(TableSchema),
    /// Table present on both sides with different column names.
    Modified {
        /// Table name.
        table_name: String,
        /// Column changes.
        column_changes: Vec<ColumnChange>,
        /// Full definition of the table on the target side.
        target: TableSchema,
    },
}

/// A change to one column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnChange {
    /// Column present only in the target.
    Added(ColumnDef),
    /// Column present only in the source.
    Removed(ColumnDef),
}

impl SchemaDiff {
    /// Compute the diff from `from` to `to`.
    pub fn compute(from: &ModelSchema, to: &ModelSchema) -> Self {
        let mut table_changes = Vec::new();

        // Added tables
        for (name, table) in &to.tables {
            if !from.has_table(name) {
                table_changes.push(TableChange::Added(table.clone()));
            }
        }

        // Modified tables
        for (name, from_table) in &from.tables {
            if let Some(to_table) = to.get_table(name) {
                let column_changes = Self::diff_columns(from_table, to_table);
                if !column_changes.is_empty() {
                    table_changes.push(TableChange::Modified {
                        table_name: name.clone(),
                        column_changes,
                        target: to_table.clone(),
                    });
                }
            }
        }

        // Removed tables
        for (name, table) in &from.tables {
            if !to.has_table(name) {
                table_changes.push(TableChange::Removed(table.clone()));
            }
        }

        SchemaDiff { table_changes }
    }

    /// Check if there are any changes.
    pub fn is_empty(&self) -> bool {
        self.table_changes.is_empty()
    }

    /// Get the total number of changes.
    pub fn change_count(&self) -> usize {
        self.table_changes
            .iter()
            .map(|c| match c {
                TableChange::Modified { column_changes, .. } => column_changes.len(),
                _ => 1,
            })
            .sum()
    }

    fn diff_columns(from: &TableSchema, to: &TableSchema) -> Vec<ColumnChange> {
        let from_names: HashSet<&str> = from.columns.iter().map(|c| c.name.as_str()).collect();
        let to_names: HashSet<&str> = to.columns.iter().map(|c| c.name.as_str()).collect();

        let mut changes = Vec::new();

        // Added columns, in target declaration order
        for column in &to.columns {
            if !from_names.contains(column.name.as_str()) {
                changes.push(ColumnChange::Added(column.clone()));
            }
        }

        // Removed columns, in source declaration order
        for column in &from.columns {
            if !to_names.contains(column.name.as_str()) {
                changes.push(ColumnChange::Removed(column.clone()));
            }
        }

        changes
    }
}
