//! SQLite backend.

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};

use super::{Dialect, LiveDatabase, INTERNAL_TABLE_PREFIX};
use crate::catalog::{ColumnDef, ColumnType, DefaultValue};
use crate::error::Error;
use crate::quote_ident;

/// A SQLite database accessed through rusqlite.
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Open (or create) a database file and verify it can be queried.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let conn = Connection::open(path).map_err(|e| match Error::from(e) {
            Error::Database(msg) => Error::ConnectionUnavailable(msg),
            other => other,
        })?;
        let db = Self { conn };
        db.verify_can_query()?;
        Ok(db)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Columns carrying a single-column UNIQUE constraint.
    fn unique_columns(&self, table: &str) -> Result<Vec<String>, Error> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA index_list({})", quote_ident(table)))?;
        let indexes = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut columns = Vec::new();
        for (index, unique, origin) in indexes {
            if unique == 0 || origin != "u" {
                continue;
            }
            let mut info = self
                .conn
                .prepare(&format!("PRAGMA index_info({})", quote_ident(&index)))?;
            let names = info
                .query_map([], |row| row.get::<_, Option<String>>(2))?
                .collect::<Result<Vec<_>, _>>()?;
            if let [Some(name)] = names.as_slice() {
                columns.push(name.clone());
            }
        }
        Ok(columns)
    }

    /// A file that is not a database only fails on first read.
    fn verify_can_query(&self) -> Result<(), Error> {
        self.conn
            .query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
            .map_err(|e| match Error::from(e) {
                Error::Database(msg) => Error::ConnectionUnavailable(msg),
                other => other,
            })?;
        Ok(())
    }
}

impl LiveDatabase for SqliteDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn table_names(&self) -> Result<Vec<String>, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names
            .into_iter()
            .filter(|name| !name.starts_with(INTERNAL_TABLE_PREFIX))
            .collect())
    }

    fn has_table(&self, table: &str) -> Result<bool, Error> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |_| Ok(true),
            )
            .optional()?;
        Ok(found.unwrap_or(false))
    }

    fn columns(&self, table: &str) -> Result<Vec<ColumnDef>, Error> {
        let unique = self.unique_columns(table)?;
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let columns = stmt
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let declared: String = row.get::<_, Option<String>>(2)?.unwrap_or_default();
                let not_null: i64 = row.get(3)?;
                let default: Option<String> = row.get(4)?;
                let pk: i64 = row.get(5)?;
                Ok(ColumnDef {
                    unique: pk == 0 && unique.contains(&name),
                    name,
                    column_type: ColumnType::from_declared(&declared),
                    nullable: not_null == 0,
                    primary_key: pk > 0,
                    default: default.map(DefaultValue::Expression),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    fn execute(&self, sql: &str) -> Result<(), Error> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn execute_in_transaction(&self, statements: &[String]) -> Result<(), Error> {
        let tx = self.conn.unchecked_transaction()?;
        for statement in statements {
            tx.execute_batch(statement)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn query_strings(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>, Error> {
        let mut stmt = self.conn.prepare(sql)?;
        let width = stmt.column_count();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| {
                        Ok(match row.get_ref(i)? {
                            ValueRef::Null => None,
                            ValueRef::Integer(v) => Some(v.to_string()),
                            ValueRef::Real(v) => Some(v.to_string()),
                            ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
                            ValueRef::Blob(b) => Some(hex::encode(b)),
                        })
                    })
                    .collect::<Result<Vec<_>, rusqlite::Error>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_count(&self, table: &str) -> Result<u64, Error> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> SqliteDatabase {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.execute(
            "CREATE TABLE ports (id INTEGER PRIMARY KEY, ip_address TEXT NOT NULL, port_number INTEGER, note TEXT DEFAULT 'x');
             CREATE TABLE _portall_bootstrap_lock (id INTEGER PRIMARY KEY);",
        )
        .unwrap();
        db
    }

    #[test]
    fn test_table_names_hide_internal() {
        let db = db();
        assert_eq!(db.table_names().unwrap(), vec!["ports".to_string()]);
        assert!(db.has_table("_portall_bootstrap_lock").unwrap());
        assert!(!db.has_table("missing").unwrap());
    }

    #[test]
    fn test_columns() {
        let db = db();
        let columns = db.columns("ports").unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "ip_address", "port_number", "note"]);
        assert!(columns[0].primary_key);
        assert!(!columns[1].nullable);
        assert!(columns[2].nullable);
        assert_eq!(
            columns[3].default,
            Some(DefaultValue::Expression("'x'".to_string()))
        );
    }

    #[test]
    fn test_unique_columns() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.execute(
            "CREATE TABLE setting (id INTEGER PRIMARY KEY, key TEXT UNIQUE, value TEXT, a TEXT, b TEXT, UNIQUE (a, b));
             CREATE UNIQUE INDEX setting_value ON setting (value);",
        )
        .unwrap();
        let unique: Vec<_> = db
            .columns("setting")
            .unwrap()
            .into_iter()
            .filter(|c| c.unique)
            .map(|c| c.name)
            .collect();
        assert_eq!(unique, vec!["key".to_string()]);
    }

    #[test]
    fn test_transaction_rolls_back() {
        let db = db();
        let result = db.execute_in_transaction(&[
            "INSERT INTO ports (id, ip_address) VALUES (1, '10.0.0.1')".to_string(),
            "INSERT INTO ports (id, ip_address) VALUES (2, NULL)".to_string(),
        ]);
        assert!(result.unwrap_err().is_integrity());
        assert_eq!(db.row_count("ports").unwrap(), 0);
    }

    #[test]
    fn test_query_strings() {
        let db = db();
        db.execute("INSERT INTO ports (id, ip_address, port_number) VALUES (1, '10.0.0.1', NULL)")
            .unwrap();
        let rows = db
            .query_strings("SELECT id, ip_address, port_number FROM ports")
            .unwrap();
        assert_eq!(
            rows,
            vec![vec![Some("1".to_string()), Some("10.0.0.1".to_string()), None]]
        );
    }

    #[test]
    fn test_open_rejects_non_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, "not a sqlite database\n".repeat(256)).unwrap();
        assert!(matches!(
            SqliteDatabase::open(&path),
            Err(Error::ConnectionUnavailable(_))
        ));
    }
}
