//! Column definitions for tables.

use crate::engine::Dialect;
use serde::{Deserialize, Serialize};

/// Column data type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Floating point.
    Real,
    /// Variable-length text.
    Text,
    /// Boolean.
    Boolean,
    /// Binary data.
    Blob,
    /// Date and time.
    Timestamp,
    /// A type observed on a live database that has no variant of its own.
    Other(String),
}

impl ColumnType {
    /// Map a declared SQL type (as reported by the database) to a column type.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.trim().to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();
        match base {
            "INTEGER" | "INT" | "INT4" | "SMALLINT" | "MEDIUMINT" | "SERIAL" => ColumnType::Integer,
            "BIGINT" | "INT8" | "BIGSERIAL" => ColumnType::BigInt,
            "REAL" | "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" | "NUMERIC" | "DECIMAL" | "FLOAT8" => {
                ColumnType::Real
            }
            "TEXT" | "VARCHAR" | "CHARACTER VARYING" | "CHAR" | "CHARACTER" | "CLOB" => {
                ColumnType::Text
            }
            "BOOLEAN" | "BOOL" => ColumnType::Boolean,
            "BLOB" | "BYTEA" => ColumnType::Blob,
            "TIMESTAMP" | "DATETIME" | "TIMESTAMP WITHOUT TIME ZONE" | "TIMESTAMP WITH TIME ZONE"
            | "TIMESTAMPTZ" => ColumnType::Timestamp,
            _ => ColumnType::Other(declared.trim().to_string()),
        }
    }

    /// Render the type for the given dialect.
    pub fn sql(&self, dialect: Dialect) -> String {
        match (self, dialect) {
            (ColumnType::Integer, _) => "INTEGER".to_string(),
            (ColumnType::BigInt, _) => "BIGINT".to_string(),
            (ColumnType::Real, Dialect::Sqlite) => "REAL".to_string(),
            (ColumnType::Real, Dialect::Postgres) => "DOUBLE PRECISION".to_string(),
            (ColumnType::Text, _) => "TEXT".to_string(),
            (ColumnType::Boolean, _) => "BOOLEAN".to_string(),
            (ColumnType::Blob, Dialect::Sqlite) => "BLOB".to_string(),
            (ColumnType::Blob, Dialect::Postgres) => "BYTEA".to_string(),
            (ColumnType::Timestamp, _) => "TIMESTAMP".to_string(),
            (ColumnType::Other(raw), _) => raw.clone(),
        }
    }
}

/// Default value for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(String),
    /// Current timestamp (evaluated at insert time).
    CurrentTimestamp,
    /// Raw SQL expression, emitted verbatim.
    Expression(String),
}

impl DefaultValue {
    /// Render the default as a SQL literal or expression.
    pub fn sql(&self) -> String {
        match self {
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::Bool(true) => "TRUE".to_string(),
            DefaultValue::Bool(false) => "FALSE".to_string(),
            DefaultValue::Int(v) => v.to_string(),
            DefaultValue::Float(v) => v.to_string(),
            DefaultValue::String(s) => format!("'{}'", s.replace('\'', "''")),
            DefaultValue::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
            DefaultValue::Expression(expr) => format!("({})", expr),
        }
    }
}

/// A column definition within a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column data type.
    pub column_type: ColumnType,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Whether the column is (part of) the primary key.
    #[serde(default)]
    pub primary_key: bool,
    /// Whether the column carries a UNIQUE constraint.
    #[serde(default)]
    pub unique: bool,
    /// Default value if not provided.
    #[serde(default)]
    pub default: Option<DefaultValue>,
}

impl ColumnDef {
    /// Create a new NOT NULL column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            primary_key: false,
            unique: false,
            default: None,
        }
    }

    /// Create a nullable column.
    pub fn optional(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, column_type)
        }
    }

    /// Create an integer primary key column.
    pub fn primary(name: impl Into<String>) -> Self {
        Self {
            primary_key: true,
            ..Self::new(name, ColumnType::Integer)
        }
    }

    /// Mark the column as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set a default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Whether `ALTER TABLE .. ADD COLUMN` can add this column to a table
    /// that may already hold rows.
    pub fn can_add_in_place(&self) -> bool {
        !self.primary_key && !self.unique && (self.nullable || self.default.is_some())
    }

    /// Whether `ALTER TABLE .. DROP COLUMN` can remove this column.
    pub fn can_drop_in_place(&self) -> bool {
        !self.primary_key && !self.unique
    }

    /// Render the column definition used in CREATE TABLE and ADD COLUMN.
    ///
    /// `inline_primary_key` is false when the table declares a composite key.
    /// A single integer key is an identity column on Postgres.
    pub fn sql(&self, dialect: Dialect, inline_primary_key: bool) -> String {
        let mut out = format!(
            "{} {}",
            crate::quote_ident(&self.name),
            self.column_type.sql(dialect)
        );
        if self.primary_key && inline_primary_key {
            if dialect == Dialect::Postgres
                && self.default.is_none()
                && matches!(self.column_type, ColumnType::Integer | ColumnType::BigInt)
            {
                out.push_str(" GENERATED BY DEFAULT AS IDENTITY");
            }
            out.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            out.push_str(" NOT NULL");
        }
        if self.unique && !self.primary_key {
            out.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default {
            out.push_str(" DEFAULT ");
            out.push_str(&default.sql());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_declared() {
        assert_eq!(ColumnType::from_declared("integer"), ColumnType::Integer);
        assert_eq!(ColumnType::from_declared("VARCHAR(15)"), ColumnType::Text);
        assert_eq!(ColumnType::from_declared("DATETIME"), ColumnType::Timestamp);
        assert_eq!(
            ColumnType::from_declared("NUM"),
            ColumnType::Other("NUM".to_string())
        );
    }

    #[test]
    fn test_column_sql() {
        let col = ColumnDef::optional("description", ColumnType::Text);
        assert_eq!(col.sql(Dialect::Sqlite, true), "\"description\" TEXT");

        let col = ColumnDef::new("port_protocol", ColumnType::Text)
            .with_default(DefaultValue::String("TCP".to_string()));
        assert_eq!(
            col.sql(Dialect::Sqlite, true),
            "\"port_protocol\" TEXT NOT NULL DEFAULT 'TCP'"
        );

        let col = ColumnDef::primary("id");
        assert_eq!(col.sql(Dialect::Sqlite, true), "\"id\" INTEGER PRIMARY KEY");
        assert_eq!(
            col.sql(Dialect::Postgres, true),
            "\"id\" INTEGER GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY"
        );
        assert_eq!(col.sql(Dialect::Postgres, false), "\"id\" INTEGER NOT NULL");
    }

    #[test]
    fn test_in_place_alteration() {
        assert!(ColumnDef::optional("nickname", ColumnType::Text).can_add_in_place());
        assert!(ColumnDef::new("order", ColumnType::Integer)
            .with_default(DefaultValue::Int(0))
            .can_add_in_place());
        assert!(!ColumnDef::new("description", ColumnType::Text).can_add_in_place());
        assert!(!ColumnDef::optional("key", ColumnType::Text)
            .unique()
            .can_add_in_place());
        assert!(!ColumnDef::primary("id").can_add_in_place());

        assert!(ColumnDef::new("legacy", ColumnType::Text).can_drop_in_place());
        assert!(!ColumnDef::primary("id").can_drop_in_place());
    }

    #[test]
    fn test_string_default_is_escaped() {
        let default = DefaultValue::String("it's".to_string());
        assert_eq!(default.sql(), "'it''s'");
    }
}
