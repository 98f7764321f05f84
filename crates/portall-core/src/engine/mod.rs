//! Live database access.
//!
//! Everything the bootstrap core does against a database goes through the
//! [`LiveDatabase`] trait: table and column enumeration, DDL/DML execution and
//! transactional batches. Backends are selected by the connection string
//! scheme (see [`DatabaseUrl`]).

mod sqlite;
mod url;

#[cfg(feature = "postgres")]
mod postgres;

pub use sqlite::SqliteDatabase;
pub use url::{DatabaseUrl, SqliteLocation};

#[cfg(feature = "postgres")]
pub use postgres::PostgresDatabase;

use crate::catalog::ColumnDef;
use crate::error::Error;

/// Prefix reserved for bookkeeping tables; such tables are never reported as
/// user tables.
pub const INTERNAL_TABLE_PREFIX: &str = "_portall_";

/// SQL dialect of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// SQLite.
    Sqlite,
    /// PostgreSQL.
    Postgres,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::Postgres => write!(f, "postgres"),
        }
    }
}

/// A synchronous connection to a live relational database.
///
/// Every call blocks until the database answers.
pub trait LiveDatabase {
    /// The backend dialect.
    fn dialect(&self) -> Dialect;

    /// User table names, sorted. Engine-internal tables and tables starting
    /// with [`INTERNAL_TABLE_PREFIX`] are excluded.
    fn table_names(&self) -> Result<Vec<String>, Error>;

    /// Whether a table exists, internal tables included.
    fn has_table(&self, table: &str) -> Result<bool, Error>;

    /// Columns of a table, in declaration order.
    fn columns(&self, table: &str) -> Result<Vec<ColumnDef>, Error>;

    /// Execute one or more statements outside an explicit transaction.
    fn execute(&self, sql: &str) -> Result<(), Error>;

    /// Execute statements in a single transaction; rolled back on any failure.
    fn execute_in_transaction(&self, statements: &[String]) -> Result<(), Error>;

    /// Run a query and return every row with each value rendered as text.
    ///
    /// Postgres backends decode text only, so non-text columns must be cast
    /// in the query.
    fn query_strings(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>, Error>;

    /// Number of rows in a table.
    fn row_count(&self, table: &str) -> Result<u64, Error>;
}

/// An opened database plus whether it existed before it was opened.
pub struct Opened {
    /// The live connection.
    pub database: Box<dyn LiveDatabase>,
    /// False when opening created the database (e.g. a new SQLite file).
    pub existed: bool,
}

impl std::fmt::Debug for Opened {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Opened")
            .field("dialect", &self.database.dialect())
            .field("existed", &self.existed)
            .finish()
    }
}

/// Open the database named by `url`.
///
/// A database that exists but cannot be queried yields
/// [`Error::ConnectionUnavailable`].
pub fn open(url: &DatabaseUrl) -> Result<Opened, Error> {
    match url {
        DatabaseUrl::Sqlite(SqliteLocation::Memory) => Ok(Opened {
            database: Box::new(SqliteDatabase::open_in_memory()?),
            existed: false,
        }),
        DatabaseUrl::Sqlite(SqliteLocation::File(path)) => {
            let existed = path.exists();
            let database = SqliteDatabase::open(path)?;
            Ok(Opened {
                database: Box::new(database),
                existed,
            })
        }
        #[cfg(feature = "postgres")]
        DatabaseUrl::Postgres(conn) => Ok(Opened {
            database: Box::new(PostgresDatabase::connect(conn)?),
            existed: true,
        }),
        #[cfg(not(feature = "postgres"))]
        DatabaseUrl::Postgres(_) => Err(Error::UnsupportedScheme(
            "postgres (built without the `postgres` feature)".to_string(),
        )),
    }
}
