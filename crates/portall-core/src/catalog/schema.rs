//! Model schema - the full set of declared tables.

use super::TableSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A set of table schemas keyed by name.
///
/// Used both for the application's declared model and for the schema observed
/// on a live database. Iteration order is sorted by table name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    /// Table definitions keyed by name.
    pub tables: BTreeMap<String, TableSchema>,
}

impl ModelSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table to the schema.
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Get a table by name.
    pub fn get_table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Check whether a table exists.
    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Table names in sorted order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether the schema declares no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType};

    #[test]
    fn test_tables_iterate_sorted() {
        let schema = ModelSchema::new()
            .with_table(TableSchema::new("setting").with_column(ColumnDef::primary("id")))
            .with_table(
                TableSchema::new("port")
                    .with_column(ColumnDef::primary("id"))
                    .with_column(ColumnDef::new("ip_address", ColumnType::Text)),
            );

        let names: Vec<_> = schema.table_names().collect();
        assert_eq!(names, vec!["port", "setting"]);
        assert_eq!(schema.len(), 2);
        assert!(schema.has_table("port"));
        assert!(schema.get_table("missing").is_none());
    }
}
