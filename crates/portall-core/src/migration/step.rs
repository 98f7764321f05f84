//! Migration steps.
//!
//! A step is an immutable, ordered list of schema operations with a unique id
//! and a pointer to its predecessor. Operations are stored dialect-free and
//! rendered to SQL when the step is applied.

use super::diff::{ColumnChange, SchemaDiff, TableChange};
use crate::catalog::{ColumnDef, TableSchema};
use crate::engine::Dialect;
use crate::{current_timestamp, quote_ident};
use serde::{Deserialize, Serialize};

/// Length of a step id in hex characters.
pub const STEP_ID_LEN: usize = 12;

/// Generate a step id from the step contents.
pub fn generate_step_id(
    parent: Option<&str>,
    message: &str,
    created_at: u64,
    operations: &[SchemaOperation],
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(parent.unwrap_or("").as_bytes());
    hasher.update(&[0]);
    hasher.update(message.as_bytes());
    hasher.update(&created_at.to_be_bytes());
    hasher.update(format!("{:?}", operations).as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash.as_bytes()[..STEP_ID_LEN / 2])
}

/// A single schema operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaOperation {
    /// Create a table.
    CreateTable {
        /// Table definition.
        table: TableSchema,
    },
    /// Drop a table.
    DropTable {
        /// Table name.
        table: String,
    },
    /// Add a column to an existing table.
    AddColumn {
        /// Table name.
        table: String,
        /// Column definition.
        column: ColumnDef,
    },
    /// Drop a column from an existing table.
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// Drop a table and create it again from its new definition.
    ///
    /// Used when a column change cannot be made in place. The rows are gone
    /// after this operation; the upgrade refills the table from its snapshot.
    RebuildTable {
        /// New table definition.
        table: TableSchema,
    },
    /// A raw SQL statement, executed verbatim.
    Execute {
        /// SQL text.
        sql: String,
    },
}

impl SchemaOperation {
    /// Render the operation to SQL statements, executed in order.
    pub fn statements(&self, dialect: Dialect) -> Vec<String> {
        match self {
            SchemaOperation::CreateTable { table } => vec![table.create_sql(dialect)],
            SchemaOperation::DropTable { table } => {
                vec![format!("DROP TABLE {}", quote_ident(table))]
            }
            SchemaOperation::AddColumn { table, column } => vec![format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quote_ident(table),
                column.sql(dialect, true)
            )],
            SchemaOperation::DropColumn { table, column } => vec![format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quote_ident(table),
                quote_ident(column)
            )],
            SchemaOperation::RebuildTable { table } => vec![
                format!("DROP TABLE {}", quote_ident(&table.name)),
                table.create_sql(dialect),
            ],
            SchemaOperation::Execute { sql } => vec![sql.clone()],
        }
    }

    /// Convert a diff into operations: new tables first, then changes to
    /// existing tables, and removed tables last.
    ///
    /// A modified table gets column additions followed by column removals,
    /// or a single rebuild when one of its column changes cannot be made
    /// with `ALTER TABLE` on a populated table.
    pub fn from_diff(diff: &SchemaDiff) -> Vec<SchemaOperation> {
        let mut ops = Vec::new();

        for change in &diff.table_changes {
            if let TableChange::Added(table) = change {
                ops.push(SchemaOperation::CreateTable {
                    table: table.clone(),
                });
            }
        }

        for change in &diff.table_changes {
            if let TableChange::Modified {
                table_name,
                column_changes,
                target,
            } = change
            {
                let in_place = column_changes.iter().all(|cc| match cc {
                    ColumnChange::Added(column) => column.can_add_in_place(),
                    ColumnChange::Removed(column) => column.can_drop_in_place(),
                });
                if !in_place {
                    ops.push(SchemaOperation::RebuildTable {
                        table: target.clone(),
                    });
                    continue;
                }

                for cc in column_changes {
                    if let ColumnChange::Added(column) = cc {
                        ops.push(SchemaOperation::AddColumn {
                            table: table_name.clone(),
                            column: column.clone(),
                        });
                    }
                }
                for cc in column_changes {
                    if let ColumnChange::Removed(column) = cc {
                        ops.push(SchemaOperation::DropColumn {
                            table: table_name.clone(),
                            column: column.name.clone(),
                        });
                    }
                }
            }
        }

        for change in &diff.table_changes {
            if let TableChange::Removed(table) = change {
                ops.push(SchemaOperation::DropTable {
                    table: table.name.clone(),
                });
            }
        }

        ops
    }
}

impl std::fmt::Display for SchemaOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaOperation::CreateTable { table } => write!(f, "create table {}", table.name),
            SchemaOperation::DropTable { table } => write!(f, "drop table {}", table),
            SchemaOperation::AddColumn { table, column } => {
                write!(f, "add column {}.{}", table, column.name)
            }
            SchemaOperation::DropColumn { table, column } => {
                write!(f, "drop column {}.{}", table, column)
            }
            SchemaOperation::RebuildTable { table } => write!(f, "rebuild table {}", table.name),
            SchemaOperation::Execute { .. } => write!(f, "execute sql"),
        }
    }
}

/// One link of the migration chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStep {
    /// Unique step id.
    pub id: String,
    /// Id of the preceding step; `None` for the root.
    pub parent: Option<String>,
    /// Human-readable description.
    pub message: String,
    /// Creation time (microseconds since Unix epoch).
    pub created_at: u64,
    /// Operations, executed in order.
    pub operations: Vec<SchemaOperation>,
}

impl MigrationStep {
    /// Create a step following `parent`.
    pub fn new(
        parent: Option<String>,
        message: impl Into<String>,
        operations: Vec<SchemaOperation>,
    ) -> Self {
        let message = message.into();
        let created_at = current_timestamp();
        let id = generate_step_id(parent.as_deref(), &message, created_at, &operations);
        Self {
            id,
            parent,
            message,
            created_at,
            operations,
        }
    }

    /// Render every operation to SQL.
    pub fn statements(&self, dialect: Dialect) -> Vec<String> {
        self.operations
            .iter()
            .flat_map(|op| op.statements(dialect))
            .collect()
    }

    /// One-line summary of the operations.
    pub fn summary(&self) -> String {
        self.operations
            .iter()
            .map(|op| op.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}
