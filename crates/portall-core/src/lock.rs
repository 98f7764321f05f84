//! Advisory lock guarding concurrent bootstraps.
//!
//! The lock is a single-row table; the row with `id = 1` is the claim. The
//! primary key makes the insert the atomic test-and-set on every backend.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::engine::LiveDatabase;
use crate::error::Error;
use crate::current_timestamp;

/// Lock table name. Carries the internal prefix so it is never a user table.
pub const LOCK_TABLE: &str = "_portall_bootstrap_lock";

/// Lock errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another bootstrap holds a fresh claim.
    #[error("bootstrap lock held by {owner} since {acquired_at} (unix seconds)")]
    Locked {
        /// Holder of the claim.
        owner: String,
        /// Claim time in seconds since the Unix epoch.
        acquired_at: u64,
    },

    /// Database error while claiming or releasing.
    #[error("lock database error: {0}")]
    Database(#[from] Error),
}

/// A claim on the bootstrap lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapLock {
    owner: String,
}

impl BootstrapLock {
    /// Claim the lock. A claim older than `stale_after` is taken over;
    /// `None` never takes over.
    pub fn acquire(
        db: &dyn LiveDatabase,
        stale_after: Option<Duration>,
    ) -> Result<Self, LockError> {
        db.execute(&format!(
            "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY, owner TEXT NOT NULL, acquired_at BIGINT NOT NULL)",
            LOCK_TABLE
        ))?;

        let lock = Self {
            owner: format!("pid-{}-{}", std::process::id(), current_timestamp()),
        };
        let now = now_secs();

        match db.execute_in_transaction(&[lock.insert_sql(now)]) {
            Ok(()) => {
                info!(owner = %lock.owner, "acquired bootstrap lock");
                return Ok(lock);
            }
            Err(e) if e.is_integrity() => {}
            Err(e) => return Err(e.into()),
        }

        let (owner, acquired_at) = match Self::holder(db)? {
            Some(holder) => holder,
            // Released between our insert and the read.
            None => {
                db.execute_in_transaction(&[lock.insert_sql(now)])
                    .map_err(|e| lock_error(e, "unknown", now))?;
                info!(owner = %lock.owner, "acquired bootstrap lock");
                return Ok(lock);
            }
        };

        let stale = stale_after
            .map(|limit| now.saturating_sub(acquired_at) > limit.as_secs())
            .unwrap_or(false);
        if !stale {
            return Err(LockError::Locked { owner, acquired_at });
        }

        warn!(
            previous_owner = %owner,
            age_secs = now.saturating_sub(acquired_at),
            "taking over stale bootstrap lock"
        );
        db.execute_in_transaction(&[
            format!(
                "DELETE FROM {} WHERE id = 1 AND acquired_at = {}",
                LOCK_TABLE, acquired_at
            ),
            lock.insert_sql(now),
        ])
        .map_err(|e| lock_error(e, &owner, acquired_at))?;

        info!(owner = %lock.owner, "acquired bootstrap lock");
        Ok(lock)
    }

    /// Release the claim. Does nothing if the claim was taken over.
    pub fn release(self, db: &dyn LiveDatabase) -> Result<(), LockError> {
        db.execute(&format!(
            "DELETE FROM {} WHERE id = 1 AND owner = '{}'",
            LOCK_TABLE,
            escape_literal(&self.owner)
        ))?;
        debug!(owner = %self.owner, "released bootstrap lock");
        Ok(())
    }

    /// Owner string recorded in the lock row.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Current holder as `(owner, acquired_at)`.
    pub fn holder(db: &dyn LiveDatabase) -> Result<Option<(String, u64)>, LockError> {
        let rows = db.query_strings(&format!(
            "SELECT owner, CAST(acquired_at AS TEXT) FROM {} WHERE id = 1",
            LOCK_TABLE
        ))?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let owner = row.first().cloned().flatten().unwrap_or_default();
        let acquired_at = row
            .get(1)
            .cloned()
            .flatten()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::InvalidData("lock row has no acquisition time".to_string()))?;
        Ok(Some((owner, acquired_at)))
    }

    fn insert_sql(&self, now: u64) -> String {
        format!(
            "INSERT INTO {} (id, owner, acquired_at) VALUES (1, '{}', {})",
            LOCK_TABLE,
            escape_literal(&self.owner),
            now
        )
    }
}

/// Someone else won the race for the row.
fn lock_error(e: Error, owner: &str, acquired_at: u64) -> LockError {
    if e.is_integrity() {
        LockError::Locked {
            owner: owner.to_string(),
            acquired_at,
        }
    } else {
        LockError::Database(e)
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn now_secs() -> u64 {
    current_timestamp() / 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SqliteDatabase;

    #[test]
    fn test_acquire_and_release() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let lock = BootstrapLock::acquire(&db, None).unwrap();

        let (owner, _) = BootstrapLock::holder(&db).unwrap().unwrap();
        assert_eq!(owner, lock.owner());
        // The lock table is not a user table.
        assert!(db.table_names().unwrap().is_empty());

        lock.release(&db).unwrap();
        assert!(BootstrapLock::holder(&db).unwrap().is_none());
    }

    #[test]
    fn test_fresh_claim_blocks() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let _held = BootstrapLock::acquire(&db, Some(Duration::from_secs(600))).unwrap();

        let err = BootstrapLock::acquire(&db, Some(Duration::from_secs(600))).unwrap_err();
        assert!(matches!(err, LockError::Locked { .. }));
    }

    #[test]
    fn test_stale_claim_is_taken_over() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.execute(&format!(
            "CREATE TABLE {} (id INTEGER PRIMARY KEY, owner TEXT NOT NULL, acquired_at BIGINT NOT NULL);
             INSERT INTO {} VALUES (1, 'crashed', 1000);",
            LOCK_TABLE, LOCK_TABLE
        ))
        .unwrap();

        assert!(matches!(
            BootstrapLock::acquire(&db, None),
            Err(LockError::Locked { acquired_at: 1000, .. })
        ));

        let lock = BootstrapLock::acquire(&db, Some(Duration::from_secs(600))).unwrap();
        let (owner, _) = BootstrapLock::holder(&db).unwrap().unwrap();
        assert_eq!(owner, lock.owner());
    }

    #[test]
    fn test_release_after_takeover_keeps_new_claim() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let old = BootstrapLock::acquire(&db, None).unwrap();
        db.execute(&format!("UPDATE {} SET owner = 'other'", LOCK_TABLE))
            .unwrap();

        old.release(&db).unwrap();
        assert_eq!(
            BootstrapLock::holder(&db).unwrap().map(|(o, _)| o),
            Some("other".to_string())
        );
    }
}
