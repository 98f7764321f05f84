//! PostgreSQL backend (feature `postgres`).
//!
//! sqlx is async; the core is synchronous, so each call is driven to
//! completion on a private runtime. The pool holds a single connection so
//! every statement of a bootstrap run sees the same session.

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tokio::runtime::Runtime;

use super::{Dialect, LiveDatabase, INTERNAL_TABLE_PREFIX};
use crate::catalog::{ColumnDef, ColumnType, DefaultValue};
use crate::error::Error;
use crate::quote_ident;

/// A PostgreSQL database accessed through sqlx.
pub struct PostgresDatabase {
    runtime: Runtime,
    pool: PgPool,
}

impl PostgresDatabase {
    /// Connect to the database named by `url`.
    pub fn connect(url: &str) -> Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;
        let pool = runtime
            .block_on(PgPoolOptions::new().max_connections(1).connect(url))
            .map_err(|e| Error::ConnectionUnavailable(e.to_string()))?;
        Ok(Self { runtime, pool })
    }
}

impl LiveDatabase for PostgresDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn table_names(&self) -> Result<Vec<String>, Error> {
        let names: Vec<String> = self.runtime.block_on(
            sqlx::query_scalar(
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
            )
            .fetch_all(&self.pool),
        )?;
        Ok(names
            .into_iter()
            .filter(|name| !name.starts_with(INTERNAL_TABLE_PREFIX))
            .collect())
    }

    fn has_table(&self, table: &str) -> Result<bool, Error> {
        let exists: bool = self.runtime.block_on(
            sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1)",
            )
            .bind(table)
            .fetch_one(&self.pool),
        )?;
        Ok(exists)
    }

    fn columns(&self, table: &str) -> Result<Vec<ColumnDef>, Error> {
        let rows: Vec<(String, String, String, Option<String>, bool, bool)> = self.runtime.block_on(
            sqlx::query_as(
                "SELECT c.column_name::text, c.data_type::text, c.is_nullable::text, c.column_default::text, \
                        COALESCE(bool_or(tc.constraint_type = 'PRIMARY KEY'), false), \
                        COALESCE(bool_or(tc.constraint_type = 'UNIQUE'), false) \
                 FROM information_schema.columns c \
                 LEFT JOIN information_schema.key_column_usage k \
                   ON k.table_schema = c.table_schema AND k.table_name = c.table_name \
                  AND k.column_name = c.column_name \
                 LEFT JOIN information_schema.table_constraints tc \
                   ON tc.constraint_schema = k.constraint_schema AND tc.constraint_name = k.constraint_name \
                 WHERE c.table_schema = current_schema() AND c.table_name = $1 \
                 GROUP BY c.column_name, c.data_type, c.is_nullable, c.column_default, c.ordinal_position \
                 ORDER BY c.ordinal_position",
            )
            .bind(table)
            .fetch_all(&self.pool),
        )?;
        Ok(rows
            .into_iter()
            .map(|(name, data_type, is_nullable, default, primary_key, unique)| ColumnDef {
                name,
                column_type: ColumnType::from_declared(&data_type),
                nullable: is_nullable == "YES",
                primary_key,
                unique: unique && !primary_key,
                default: default.map(DefaultValue::Expression),
            })
            .collect())
    }

    fn execute(&self, sql: &str) -> Result<(), Error> {
        self.runtime
            .block_on(sqlx::raw_sql(sql).execute(&self.pool))?;
        Ok(())
    }

    fn execute_in_transaction(&self, statements: &[String]) -> Result<(), Error> {
        self.runtime.block_on(async {
            let mut tx = self.pool.begin().await?;
            for statement in statements {
                sqlx::raw_sql(statement).execute(&mut *tx).await?;
            }
            tx.commit().await
        })?;
        Ok(())
    }

    fn query_strings(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>, Error> {
        let rows = self
            .runtime
            .block_on(sqlx::query(sql).fetch_all(&self.pool))?;
        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| row.try_get::<Option<String>, _>(i).map_err(Error::from))
                    .collect()
            })
            .collect()
    }

    fn row_count(&self, table: &str) -> Result<u64, Error> {
        let count: i64 = self.runtime.block_on(
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
                .fetch_one(&self.pool),
        )?;
        Ok(count.max(0) as u64)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        match &err {
            sqlx::Error::Database(db) => match db.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => Error::Integrity(err.to_string()),
                _ => Error::Database(err.to_string()),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => Error::ConnectionUnavailable(err.to_string()),
            _ => Error::Database(err.to_string()),
        }
    }
}
