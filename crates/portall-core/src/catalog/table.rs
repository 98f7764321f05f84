//! Table definitions.

use super::column::ColumnDef;
use crate::engine::Dialect;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A table: a name plus its columns, observed live or declared by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Create a table with no columns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Add a column to the table.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Get a column by name.
    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The set of column names.
    pub fn column_names(&self) -> BTreeSet<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Compatible iff the column-name sets are equal. Types are not compared.
    pub fn is_compatible_with(&self, other: &TableSchema) -> bool {
        self.column_names() == other.column_names()
    }

    /// Render the CREATE TABLE statement for this table.
    pub fn create_sql(&self, dialect: Dialect) -> String {
        let pk: Vec<&str> = self
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect();
        let inline_pk = pk.len() <= 1;

        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.sql(dialect, inline_pk))
            .collect();
        if !inline_pk {
            let cols: Vec<String> = pk.iter().map(|c| crate::quote_ident(c)).collect();
            parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
        }

        format!(
            "CREATE TABLE {} ({})",
            crate::quote_ident(&self.name),
            parts.join(", ")
        )
    }
}
