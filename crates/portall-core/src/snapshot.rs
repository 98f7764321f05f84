//! Shadow-table snapshots.
//!
//! Before a risky schema change every live table is copied into a shadow
//! table. The copies are used to put the original tables back when the change
//! fails and as the data source for reconciliation when it succeeds.
//!
//! A shadow is declared like its original (column types, NOT NULL, defaults,
//! primary key and single-column UNIQUE) so a restored table keeps its shape.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::TableSchema;
use crate::engine::{Dialect, LiveDatabase};
use crate::error::Error;
use crate::{quote_ident, quote_list};

/// Default prefix for shadow table names.
pub const DEFAULT_SHADOW_PREFIX: &str = "temp_";

/// Snapshot failure. No shadow table survives it.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Live tables could not be listed.
    #[error("failed to list live tables: {0}")]
    Inspect(#[source] Error),

    /// Copying one table failed.
    #[error("failed to snapshot table '{table}': {source}")]
    Table {
        /// Table being copied.
        table: String,
        /// Underlying database error.
        #[source]
        source: Error,
    },
}

/// Mapping from live tables to their shadows, plus the tables that existed
/// when the snapshot was taken.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TempTableSet {
    shadows: BTreeMap<String, String>,
    baseline: BTreeSet<String>,
}

impl TempTableSet {
    /// Shadow table for `original`, if one was taken.
    pub fn shadow_of(&self, original: &str) -> Option<&str> {
        self.shadows.get(original).map(String::as_str)
    }

    /// `(original, shadow)` pairs in table-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.shadows.iter().map(|(o, s)| (o.as_str(), s.as_str()))
    }

    /// Number of shadowed tables.
    pub fn len(&self) -> usize {
        self.shadows.len()
    }

    /// Whether no table was shadowed.
    pub fn is_empty(&self) -> bool {
        self.shadows.is_empty()
    }

    /// Whether `table` existed when the snapshot was taken.
    pub fn existed_at_snapshot(&self, table: &str) -> bool {
        self.baseline.contains(table)
    }

    /// Copy of this set without the given originals.
    pub fn without<S: AsRef<str>>(&self, originals: &[S]) -> TempTableSet {
        let mut set = self.clone();
        for original in originals {
            set.shadows.remove(original.as_ref());
        }
        set
    }

    fn is_shadow(&self, table: &str) -> bool {
        self.shadows.values().any(|s| s == table)
    }
}

/// Result for one table in a best-effort loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOutcome {
    /// Table acted on.
    pub table: String,
    /// Failure reason; `None` on success.
    pub error: Option<String>,
}

impl TableOutcome {
    fn ok(table: &str) -> Self {
        Self {
            table: table.to_string(),
            error: None,
        }
    }

    fn failed(table: &str, error: &Error) -> Self {
        Self {
            table: table.to_string(),
            error: Some(error.to_string()),
        }
    }

    /// Whether the action succeeded.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of [`TempTableManager::restore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Tables created after the snapshot and dropped again.
    pub dropped: Vec<TableOutcome>,
    /// Originals put back from their shadows.
    pub restored: Vec<TableOutcome>,
}

impl RestoreReport {
    /// Originals whose restore failed; their shadows still hold the data.
    pub fn failed_tables(&self) -> Vec<String> {
        self.restored
            .iter()
            .filter(|o| !o.is_ok())
            .map(|o| o.table.clone())
            .collect()
    }

    /// Whether every table was handled.
    pub fn is_success(&self) -> bool {
        self.dropped.iter().chain(&self.restored).all(TableOutcome::is_ok)
    }
}

/// Outcome of [`TempTableManager::cleanup`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// One entry per shadow table.
    pub tables: Vec<TableOutcome>,
}

impl CleanupReport {
    /// Whether every shadow was dropped.
    pub fn is_success(&self) -> bool {
        self.tables.iter().all(TableOutcome::is_ok)
    }
}

/// Creates, restores and drops shadow tables.
#[derive(Debug, Clone)]
pub struct TempTableManager {
    prefix: String,
}

impl Default for TempTableManager {
    fn default() -> Self {
        Self::new(DEFAULT_SHADOW_PREFIX)
    }
}

impl TempTableManager {
    /// Create a manager naming shadows `<prefix><table>`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Shadow name prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Copy every live table into a fresh shadow table.
    ///
    /// All-or-nothing: on failure the shadows created so far are dropped.
    pub fn snapshot(&self, db: &dyn LiveDatabase) -> Result<TempTableSet, SnapshotError> {
        let tables = db.table_names().map_err(SnapshotError::Inspect)?;
        let mut set = TempTableSet {
            shadows: BTreeMap::new(),
            baseline: tables.iter().cloned().collect(),
        };

        for table in &tables {
            let result = self.shadow_name(db, table, &set).and_then(|shadow| {
                let statements = copy_statements(db, table, &shadow)?;
                db.execute_in_transaction(&statements).map(|()| shadow)
            });

            match result {
                Ok(shadow) => {
                    debug!(table = %table, shadow = %shadow, "created shadow table");
                    set.shadows.insert(table.clone(), shadow);
                }
                Err(source) => {
                    warn!(table = %table, error = %source, "snapshot failed, dropping shadows");
                    self.discard(db, &set);
                    return Err(SnapshotError::Table {
                        table: table.clone(),
                        source,
                    });
                }
            }
        }

        info!(tables = set.len(), "snapshot taken");
        Ok(set)
    }

    /// Put the snapshot back in place of the live tables.
    ///
    /// Tables created after the snapshot are dropped first. Each original is
    /// then dropped and replaced by its shadow in one transaction. Failures
    /// are recorded per table and do not stop the loop.
    pub fn restore(&self, db: &dyn LiveDatabase, set: &TempTableSet) -> RestoreReport {
        let mut report = RestoreReport::default();

        match db.table_names() {
            Ok(current) => {
                for table in current
                    .iter()
                    .filter(|t| !set.existed_at_snapshot(t) && !set.is_shadow(t))
                {
                    match db.execute(&format!("DROP TABLE {}", quote_ident(table))) {
                        Ok(()) => {
                            debug!(table = %table, "dropped table created after snapshot");
                            report.dropped.push(TableOutcome::ok(table));
                        }
                        Err(e) => {
                            warn!(table = %table, error = %e, "failed to drop table created after snapshot");
                            report.dropped.push(TableOutcome::failed(table, &e));
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "failed to list live tables before restore"),
        }

        for (original, shadow) in set.iter() {
            let statements = vec![
                format!("DROP TABLE IF EXISTS {}", quote_ident(original)),
                format!(
                    "ALTER TABLE {} RENAME TO {}",
                    quote_ident(shadow),
                    quote_ident(original)
                ),
            ];
            match db.execute_in_transaction(&statements) {
                Ok(()) => {
                    debug!(table = %original, shadow = %shadow, "restored table");
                    report.restored.push(TableOutcome::ok(original));
                }
                Err(e) => {
                    warn!(table = %original, shadow = %shadow, error = %e, "failed to restore table");
                    report.restored.push(TableOutcome::failed(original, &e));
                }
            }
        }

        info!(
            restored = report.restored.iter().filter(|o| o.is_ok()).count(),
            failed = report.failed_tables().len(),
            "restore finished"
        );
        report
    }

    /// Drop every shadow in `set`. Shadows that are already gone are fine.
    pub fn cleanup(&self, db: &dyn LiveDatabase, set: &TempTableSet) -> CleanupReport {
        let mut report = CleanupReport::default();
        for (_, shadow) in set.iter() {
            match db.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(shadow))) {
                Ok(()) => report.tables.push(TableOutcome::ok(shadow)),
                Err(e) => {
                    warn!(shadow = %shadow, error = %e, "failed to drop shadow table");
                    report.tables.push(TableOutcome::failed(shadow, &e));
                }
            }
        }
        debug!(shadows = report.tables.len(), "cleanup finished");
        report
    }

    /// First free `<prefix><table>[_N]` name.
    fn shadow_name(
        &self,
        db: &dyn LiveDatabase,
        table: &str,
        set: &TempTableSet,
    ) -> Result<String, Error> {
        let base = format!("{}{}", self.prefix, table);
        let mut candidate = base.clone();
        let mut n = 0;
        while set.baseline.contains(&candidate) || set.is_shadow(&candidate) || db.has_table(&candidate)? {
            n += 1;
            candidate = format!("{}_{}", base, n);
        }
        Ok(candidate)
    }

    fn discard(&self, db: &dyn LiveDatabase, set: &TempTableSet) {
        let report = self.cleanup(db, set);
        if !report.is_success() {
            warn!("some shadow tables could not be dropped after a failed snapshot");
        }
    }
}

/// Statements that create `shadow` shaped like `table` and copy its rows.
fn copy_statements(db: &dyn LiveDatabase, table: &str, shadow: &str) -> Result<Vec<String>, Error> {
    match db.dialect() {
        Dialect::Sqlite => {
            let columns = db.columns(table)?;
            let cols = quote_list(&columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>());
            let create = TableSchema {
                name: shadow.to_string(),
                columns,
            }
            .create_sql(Dialect::Sqlite);
            Ok(vec![
                create,
                format!(
                    "INSERT INTO {} ({}) SELECT {} FROM {}",
                    quote_ident(shadow),
                    cols,
                    cols,
                    quote_ident(table)
                ),
            ])
        }
        Dialect::Postgres => Ok(vec![
            format!(
                "CREATE TABLE {} (LIKE {} INCLUDING ALL)",
                quote_ident(shadow),
                quote_ident(table)
            ),
            format!(
                "INSERT INTO {} OVERRIDING SYSTEM VALUE SELECT * FROM {}",
                quote_ident(shadow),
                quote_ident(table)
            ),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SqliteDatabase;

    fn db() -> SqliteDatabase {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.execute(
            "CREATE TABLE ports (id INTEGER PRIMARY KEY, ip_address TEXT, port_number INTEGER);
             INSERT INTO ports VALUES (1, '10.0.0.1', 80), (2, NULL, 443), (3, '10.0.0.3', NULL);
             CREATE TABLE setting (id INTEGER PRIMARY KEY, key TEXT, value TEXT);",
        )
        .unwrap();
        db
    }

    fn dump(db: &SqliteDatabase, table: &str) -> Vec<Vec<Option<String>>> {
        db.query_strings(&format!("SELECT * FROM {} ORDER BY id", quote_ident(table)))
            .unwrap()
    }

    #[test]
    fn test_snapshot_creates_shadows() {
        let db = db();
        let set = TempTableManager::default().snapshot(&db).unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.shadow_of("ports"), Some("temp_ports"));
        assert_eq!(set.shadow_of("setting"), Some("temp_setting"));
        assert_eq!(dump(&db, "temp_ports"), dump(&db, "ports"));
        assert_eq!(db.row_count("temp_setting").unwrap(), 0);
    }

    #[test]
    fn test_shadow_name_collision() {
        let db = db();
        db.execute("CREATE TABLE temp_ports (x TEXT); CREATE TABLE temp_ports_1 (x TEXT);")
            .unwrap();
        let set = TempTableManager::default().snapshot(&db).unwrap();

        assert_eq!(set.shadow_of("ports"), Some("temp_ports_2"));
        // The pre-existing temp tables are live tables and are shadowed too.
        assert_eq!(set.shadow_of("temp_ports"), Some("temp_temp_ports"));
        let shadows: BTreeSet<&str> = set.iter().map(|(_, s)| s).collect();
        assert_eq!(shadows.len(), set.len());
    }

    #[test]
    fn test_restore_round_trip() {
        let db = db();
        let manager = TempTableManager::default();
        let before_ports = dump(&db, "ports");
        let set = manager.snapshot(&db).unwrap();

        db.execute(
            "ALTER TABLE ports ADD COLUMN description TEXT;
             DELETE FROM ports WHERE id = 1;
             INSERT INTO setting VALUES (1, 'theme', 'dark');
             CREATE TABLE added_later (id INTEGER);",
        )
        .unwrap();

        let report = manager.restore(&db, &set);
        assert!(report.is_success());
        assert_eq!(report.dropped, vec![TableOutcome::ok("added_later")]);
        assert_eq!(dump(&db, "ports"), before_ports);
        assert_eq!(db.row_count("setting").unwrap(), 0);
        assert_eq!(
            db.table_names().unwrap(),
            vec!["ports".to_string(), "setting".to_string()]
        );

        // Shadows were renamed away; cleanup has nothing left to drop.
        assert!(manager.cleanup(&db, &set).is_success());
    }

    #[test]
    fn test_restore_keeps_table_shape() {
        let db = db();
        db.execute("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL DEFAULT 'empty')")
            .unwrap();
        let manager = TempTableManager::default();
        let set = manager.snapshot(&db).unwrap();
        db.execute("DROP TABLE ports; DROP TABLE notes;").unwrap();

        assert!(manager.restore(&db, &set).is_success());
        let ports = db.columns("ports").unwrap();
        assert_eq!(ports[0].name, "id");
        assert!(ports[0].primary_key);
        let notes = db.columns("notes").unwrap();
        assert!(!notes[1].nullable);

        // The key is still a rowid alias and the default still applies.
        db.execute("INSERT INTO notes DEFAULT VALUES").unwrap();
        assert_eq!(
            db.query_strings("SELECT id, body FROM notes").unwrap(),
            vec![vec![Some("1".to_string()), Some("empty".to_string())]]
        );
        assert_eq!(dump(&db, "ports").len(), 3);
    }

    #[test]
    fn test_restore_recreates_dropped_table() {
        let db = db();
        let manager = TempTableManager::default();
        let set = manager.snapshot(&db).unwrap();
        db.execute("DROP TABLE ports").unwrap();

        let report = manager.restore(&db, &set);
        assert!(report.is_success());
        assert_eq!(db.row_count("ports").unwrap(), 3);
    }

    #[test]
    fn test_restore_failure_is_per_table() {
        let db = db();
        let manager = TempTableManager::default();
        let set = manager.snapshot(&db).unwrap();
        db.execute("DROP TABLE temp_setting").unwrap();

        let report = manager.restore(&db, &set);
        assert_eq!(report.failed_tables(), vec!["setting".to_string()]);
        assert!(report.restored.iter().any(|o| o.table == "ports" && o.is_ok()));
        // The failed transaction left the live table alone.
        assert!(db.has_table("setting").unwrap());
    }

    #[test]
    fn test_cleanup_tolerates_missing_shadows() {
        let db = db();
        let manager = TempTableManager::default();
        let set = manager.snapshot(&db).unwrap();
        db.execute("DROP TABLE temp_ports").unwrap();

        let report = manager.cleanup(&db, &set);
        assert!(report.is_success());
        assert!(!db.has_table("temp_setting").unwrap());
    }

    #[test]
    fn test_without_excludes_from_cleanup() {
        let db = db();
        let manager = TempTableManager::default();
        let set = manager.snapshot(&db).unwrap();

        manager.cleanup(&db, &set.without(&["ports"]));
        assert!(db.has_table("temp_ports").unwrap());
        assert!(!db.has_table("temp_setting").unwrap());
    }

    #[test]
    fn test_custom_prefix() {
        let db = db();
        let set = TempTableManager::new("shadow_").snapshot(&db).unwrap();
        assert_eq!(set.shadow_of("ports"), Some("shadow_ports"));
    }
}
