//! Connection string parsing.

use crate::error::Error;
use std::path::PathBuf;
use std::str::FromStr;

/// Where a SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteLocation {
    /// A database file.
    File(PathBuf),
    /// A private in-memory database.
    Memory,
}

/// A parsed connection string. The scheme selects the backend.
///
/// SQLite follows the SQLAlchemy convention: `sqlite:///portall.db` is the
/// relative path `portall.db`, `sqlite:////var/lib/portall.db` is absolute,
/// and `sqlite://` or `sqlite:///:memory:` is an in-memory database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    /// SQLite database.
    Sqlite(SqliteLocation),
    /// PostgreSQL connection string, kept verbatim.
    Postgres(String),
}

impl FromStr for DatabaseUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| Error::UnsupportedScheme(format!("missing scheme in '{}'", s)))?;

        match scheme.to_ascii_lowercase().as_str() {
            "sqlite" => {
                let path = rest.strip_prefix('/').unwrap_or(rest);
                if path.is_empty() || path == ":memory:" {
                    Ok(DatabaseUrl::Sqlite(SqliteLocation::Memory))
                } else {
                    Ok(DatabaseUrl::Sqlite(SqliteLocation::File(PathBuf::from(path))))
                }
            }
            "postgres" | "postgresql" => Ok(DatabaseUrl::Postgres(s.to_string())),
            other => Err(Error::UnsupportedScheme(other.to_string())),
        }
    }
}

impl std::fmt::Display for DatabaseUrl {
    /// Renders the URL with any password redacted.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseUrl::Sqlite(SqliteLocation::Memory) => write!(f, "sqlite:///:memory:"),
            DatabaseUrl::Sqlite(SqliteLocation::File(path)) => {
                write!(f, "sqlite:///{}", path.display())
            }
            DatabaseUrl::Postgres(url) => write!(f, "{}", redact_password(url)),
        }
    }
}

fn redact_password(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host),
        None => url.to_string(),
    }
}
