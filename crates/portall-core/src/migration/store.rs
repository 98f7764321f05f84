//! On-disk migration store.
//!
//! Layout under the store root:
//!
//! ```text
//! store.json                    manifest (format version, creation time)
//! versions/0001_<id>.json       one file per step, prefixed by chain position
//! applied.json                  applied-version marker
//! ```
//!
//! Every file is written atomically (temp file in the same directory, then
//! rename). Step files are never rewritten once created; only an unapplied
//! tip may be removed.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::diff::SchemaDiff;
use super::error::MigrationError;
use super::state::{ApplyReport, StepOutcome};
use super::step::{MigrationStep, SchemaOperation};
use crate::catalog::ModelSchema;
use crate::current_timestamp;
use crate::engine::LiveDatabase;

/// Current on-disk format version.
pub const STORE_FORMAT_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "store.json";
const MARKER_FILE: &str = "applied.json";
const VERSIONS_DIR: &str = "versions";

/// Store manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreManifest {
    format_version: u32,
    created_at: u64,
}

/// Applied-version marker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AppliedMarker {
    revision: Option<String>,
    updated_at: u64,
}

/// The versioned chain of migration steps plus the applied marker.
#[derive(Debug, Clone)]
pub struct MigrationStore {
    root: PathBuf,
}

impl MigrationStore {
    /// Create a handle for the store at `root`. Nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the store exists on disk.
    pub fn is_initialized(&self) -> bool {
        self.root.join(MANIFEST_FILE).is_file()
    }

    /// Create the store if absent. Returns `true` if it was created.
    pub fn initialize(&self) -> Result<bool, MigrationError> {
        if self.is_initialized() {
            debug!(path = %self.root.display(), "migration store already initialized");
            return Ok(false);
        }

        fs::create_dir_all(self.versions_dir())?;
        if !self.marker_path().exists() {
            write_json_atomic(&self.marker_path(), &AppliedMarker::default())?;
        }
        // Manifest last: its presence marks the store as complete.
        write_json_atomic(
            &self.root.join(MANIFEST_FILE),
            &StoreManifest {
                format_version: STORE_FORMAT_VERSION,
                created_at: current_timestamp(),
            },
        )?;

        info!(path = %self.root.display(), "initialized migration store");
        Ok(true)
    }

    /// Load and validate the full chain, root first.
    pub fn chain(&self) -> Result<Vec<MigrationStep>, MigrationError> {
        self.check_manifest()?;

        let mut files = Vec::new();
        for entry in fs::read_dir(self.versions_dir())? {
            if let Ok(name) = entry?.file_name().into_string() {
                if name.ends_with(".json") {
                    files.push(name);
                }
            }
        }
        files.sort();

        let mut chain: Vec<MigrationStep> = Vec::with_capacity(files.len());
        for (idx, name) in files.iter().enumerate() {
            let position = idx + 1;
            let broken = |message: String| MigrationError::ChainBroken { position, message };

            let (prefix, rest) = name
                .split_once('_')
                .ok_or_else(|| broken(format!("unexpected file name '{}'", name)))?;
            let seq: usize = prefix
                .parse()
                .map_err(|_| broken(format!("unexpected file name '{}'", name)))?;
            if seq != position {
                return Err(broken(format!("expected position {}, found '{}'", position, name)));
            }

            let step: MigrationStep = read_json(&self.versions_dir().join(name))?;
            if rest.trim_end_matches(".json") != step.id {
                return Err(broken(format!("file '{}' holds step {}", name, step.id)));
            }
            let expected_parent = chain.last().map(|s| s.id.as_str());
            if step.parent.as_deref() != expected_parent {
                return Err(broken(format!(
                    "step {} has parent {:?}, expected {:?}",
                    step.id, step.parent, expected_parent
                )));
            }
            if chain.iter().any(|s| s.id == step.id) {
                return Err(broken(format!("duplicate step id {}", step.id)));
            }
            chain.push(step);
        }

        Ok(chain)
    }

    /// Id of the chain tip, if any.
    pub fn head(&self) -> Result<Option<String>, MigrationError> {
        Ok(self.chain()?.last().map(|s| s.id.clone()))
    }

    /// Id of the last applied step, if any.
    pub fn applied(&self) -> Result<Option<String>, MigrationError> {
        let chain = self.chain()?;
        self.applied_position(&chain)
            .map(|pos| pos.map(|p| chain[p - 1].id.clone()))
    }

    /// Steps after the applied marker, in chain order.
    pub fn pending(&self) -> Result<Vec<MigrationStep>, MigrationError> {
        let mut chain = self.chain()?;
        let applied = self.applied_position(&chain)?.unwrap_or(0);
        Ok(chain.split_off(applied))
    }

    /// Synthesize the root step from the empty schema to `model`.
    pub fn generate_initial(&self, model: &ModelSchema) -> Result<MigrationStep, MigrationError> {
        if let Some(tip) = self.head()? {
            return Err(MigrationError::InitialExists { tip });
        }
        let diff = SchemaDiff::compute(&ModelSchema::new(), model);
        if diff.is_empty() {
            return Err(MigrationError::NoChanges);
        }
        let step = MigrationStep::new(None, "initial migration", SchemaOperation::from_diff(&diff));
        self.append(step)
    }

    /// Append a step that turns `live` into `model`. Returns `None` when the
    /// two schemas have no structural difference.
    pub fn generate_revision(
        &self,
        live: &ModelSchema,
        model: &ModelSchema,
        message: &str,
    ) -> Result<Option<MigrationStep>, MigrationError> {
        let diff = SchemaDiff::compute(live, model);
        if diff.is_empty() {
            return Ok(None);
        }
        let step = MigrationStep::new(self.head()?, message, SchemaOperation::from_diff(&diff));
        self.append(step).map(Some)
    }

    /// Apply every pending step in order, each in its own transaction.
    ///
    /// The marker advances after each committed step. On the first failure
    /// the remaining steps are reported as skipped and not attempted.
    pub fn apply(&self, db: &dyn LiveDatabase) -> Result<ApplyReport, MigrationError> {
        let chain = self.chain()?;
        let start = self.applied_position(&chain)?.unwrap_or(0);
        let mut report = ApplyReport::default();

        if start == chain.len() {
            info!("no pending migration steps");
            return Ok(report);
        }

        for (idx, step) in chain.iter().enumerate().skip(start) {
            let position = idx + 1;
            info!(step_id = %step.id, position, message = %step.message, "applying migration step");

            match db.execute_in_transaction(&step.statements(db.dialect())) {
                Ok(()) => {
                    self.write_marker(Some(&step.id))?;
                    report.push(&step.id, &step.message, StepOutcome::Applied);
                }
                Err(e) => {
                    error!(step_id = %step.id, position, error = %e, "migration step failed");
                    report.push(&step.id, &step.message, StepOutcome::Failed(e.to_string()));
                    for later in &chain[position..] {
                        report.push(&later.id, &later.message, StepOutcome::Skipped);
                    }
                    return Err(MigrationError::ApplyFailed {
                        step_id: step.id.clone(),
                        position,
                        source: e,
                        report,
                    });
                }
            }
        }

        info!(applied = report.applied_count(), "migration steps applied");
        Ok(report)
    }

    /// Set the marker to the chain tip without executing any DDL.
    pub fn stamp(&self) -> Result<Option<String>, MigrationError> {
        let head = self.head()?;
        self.write_marker(head.as_deref())?;
        info!(revision = ?head, "stamped migration marker");
        Ok(head)
    }

    /// Set the marker to `revision` (`None` for nothing applied) without
    /// executing any DDL. The revision must be in the chain.
    pub fn stamp_to(&self, revision: Option<&str>) -> Result<(), MigrationError> {
        if let Some(rev) = revision {
            if !self.chain()?.iter().any(|s| s.id == rev) {
                return Err(MigrationError::StateCorrupted {
                    message: format!("cannot stamp unknown revision {}", rev),
                });
            }
        }
        self.write_marker(revision)?;
        info!(revision = ?revision, "stamped migration marker");
        Ok(())
    }

    /// Remove the chain tip `step_id`, which must not be applied.
    ///
    /// Undoes a generated step whose upgrade failed, so a later run can
    /// generate a fresh one.
    pub fn discard_tip(&self, step_id: &str) -> Result<(), MigrationError> {
        let chain = self.chain()?;
        let position = chain.len();
        if chain.last().map(|s| s.id.as_str()) != Some(step_id) {
            return Err(MigrationError::StateCorrupted {
                message: format!("cannot discard step {}: not the chain tip", step_id),
            });
        }
        if self.applied_position(&chain)? == Some(position) {
            return Err(MigrationError::StateCorrupted {
                message: format!("cannot discard step {}: already applied", step_id),
            });
        }

        let name = format!("{:04}_{}.json", position, step_id);
        fs::remove_file(self.versions_dir().join(name))?;
        info!(step_id = %step_id, position, "discarded unapplied migration step");
        Ok(())
    }

    fn append(&self, step: MigrationStep) -> Result<MigrationStep, MigrationError> {
        let chain = self.chain()?;
        let tip = chain.last().map(|s| s.id.as_str());
        if step.parent.as_deref() != tip {
            return Err(MigrationError::ChainBroken {
                position: chain.len() + 1,
                message: format!("new step parent {:?} is not the tip {:?}", step.parent, tip),
            });
        }

        let name = format!("{:04}_{}.json", chain.len() + 1, step.id);
        write_json_atomic(&self.versions_dir().join(&name), &step)?;
        info!(step_id = %step.id, summary = %step.summary(), "generated migration step");
        Ok(step)
    }

    /// 1-based chain position of the marker; `None` when nothing is applied.
    fn applied_position(&self, chain: &[MigrationStep]) -> Result<Option<usize>, MigrationError> {
        let marker: AppliedMarker = read_json(&self.marker_path())?;
        match marker.revision {
            None => Ok(None),
            Some(rev) => chain
                .iter()
                .position(|s| s.id == rev)
                .map(|idx| Some(idx + 1))
                .ok_or_else(|| MigrationError::StateCorrupted {
                    message: format!("applied revision {} is not in the chain", rev),
                }),
        }
    }

    fn write_marker(&self, revision: Option<&str>) -> Result<(), MigrationError> {
        write_json_atomic(
            &self.marker_path(),
            &AppliedMarker {
                revision: revision.map(str::to_string),
                updated_at: current_timestamp(),
            },
        )
    }

    fn check_manifest(&self) -> Result<(), MigrationError> {
        if !self.is_initialized() {
            return Err(MigrationError::NotInitialized {
                path: self.root.clone(),
            });
        }
        let manifest: StoreManifest = read_json(&self.root.join(MANIFEST_FILE))?;
        if manifest.format_version != STORE_FORMAT_VERSION {
            return Err(MigrationError::StateCorrupted {
                message: format!(
                    "unsupported store format version {} (expected {})",
                    manifest.format_version, STORE_FORMAT_VERSION
                ),
            });
        }
        Ok(())
    }

    fn versions_dir(&self) -> PathBuf {
        self.root.join(VERSIONS_DIR)
    }

    fn marker_path(&self) -> PathBuf {
        self.root.join(MARKER_FILE)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, MigrationError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| MigrationError::Deserialization(format!("{}: {}", path.display(), e)))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), MigrationError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| MigrationError::Serialization(e.to_string()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| MigrationError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType, TableSchema};
    use crate::engine::SqliteDatabase;

    fn model() -> ModelSchema {
        ModelSchema::new().with_table(
            TableSchema::new("ports")
                .with_column(ColumnDef::primary("id"))
                .with_column(ColumnDef::new("ip_address", ColumnType::Text)),
        )
    }

    fn store() -> (tempfile::TempDir, MigrationStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStore::new(dir.path().join("migrations"));
        (dir, store)
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (_dir, store) = store();
        assert!(!store.is_initialized());
        assert!(store.initialize().unwrap());
        assert!(store.is_initialized());
        assert!(!store.initialize().unwrap());
        assert!(store.chain().unwrap().is_empty());
        assert_eq!(store.applied().unwrap(), None);
    }

    #[test]
    fn test_uninitialized_store() {
        let (_dir, store) = store();
        assert!(matches!(
            store.chain(),
            Err(MigrationError::NotInitialized { .. })
        ));
    }

    #[test]
    fn test_generate_initial_once() {
        let (_dir, store) = store();
        store.initialize().unwrap();

        let step = store.generate_initial(&model()).unwrap();
        assert!(step.parent.is_none());
        assert!(matches!(
            step.operations.as_slice(),
            [SchemaOperation::CreateTable { table }] if table.name == "ports"
        ));

        assert!(matches!(
            store.generate_initial(&model()),
            Err(MigrationError::InitialExists { .. })
        ));
        assert!(store
            .root()
            .join("versions")
            .join(format!("0001_{}.json", step.id))
            .is_file());
    }

    #[test]
    fn test_generate_revision_links_parent() {
        let (_dir, store) = store();
        store.initialize().unwrap();
        let root = store.generate_initial(&model()).unwrap();

        let mut target = model();
        target.tables.get_mut("ports").unwrap().columns.push(ColumnDef::optional(
            "description",
            ColumnType::Text,
        ));

        let step = store
            .generate_revision(&model(), &target, "add description")
            .unwrap()
            .unwrap();
        assert_eq!(step.parent.as_deref(), Some(root.id.as_str()));
        assert_eq!(store.chain().unwrap().len(), 2);

        assert!(store
            .generate_revision(&target, &target, "noop")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_stamp_sets_marker_to_tip() {
        let (_dir, store) = store();
        store.initialize().unwrap();
        let root = store.generate_initial(&model()).unwrap();

        assert_eq!(store.pending().unwrap().len(), 1);
        assert_eq!(store.stamp().unwrap(), Some(root.id.clone()));
        assert_eq!(store.applied().unwrap(), Some(root.id));
        assert!(store.pending().unwrap().is_empty());
    }

    #[test]
    fn test_stamp_to() {
        let (_dir, store) = store();
        store.initialize().unwrap();
        let root = store.generate_initial(&model()).unwrap();

        store.stamp().unwrap();
        store.stamp_to(None).unwrap();
        assert_eq!(store.applied().unwrap(), None);
        store.stamp_to(Some(&root.id)).unwrap();
        assert_eq!(store.applied().unwrap(), Some(root.id));
        assert!(matches!(
            store.stamp_to(Some("000000000000")),
            Err(MigrationError::StateCorrupted { .. })
        ));
    }

    #[test]
    fn test_discard_unapplied_tip() {
        let (_dir, store) = store();
        store.initialize().unwrap();
        let root = store.generate_initial(&model()).unwrap();
        store.stamp().unwrap();

        let mut target = model();
        target.tables.get_mut("ports").unwrap().columns.push(ColumnDef::optional(
            "description",
            ColumnType::Text,
        ));
        let step = store
            .generate_revision(&model(), &target, "add description")
            .unwrap()
            .unwrap();

        assert!(matches!(
            store.discard_tip(&root.id),
            Err(MigrationError::StateCorrupted { .. })
        ));
        store.discard_tip(&step.id).unwrap();
        assert_eq!(store.head().unwrap(), Some(root.id.clone()));
        assert!(store.pending().unwrap().is_empty());

        // An applied tip stays.
        assert!(matches!(
            store.discard_tip(&root.id),
            Err(MigrationError::StateCorrupted { .. })
        ));
        assert_eq!(store.chain().unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_versions_dir_is_an_io_error() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = store();
        store.initialize().unwrap();
        store.generate_initial(&model()).unwrap();

        let versions = store.root().join("versions");
        fs::set_permissions(&versions, fs::Permissions::from_mode(0o000)).unwrap();
        let readable = fs::read_dir(&versions).is_ok();
        let result = store.chain();
        fs::set_permissions(&versions, fs::Permissions::from_mode(0o755)).unwrap();

        // Running as root ignores directory permissions.
        if !readable {
            assert!(matches!(result, Err(MigrationError::Io(_))));
        }
    }

    #[test]
    fn test_apply_executes_pending_steps() {
        let (_dir, store) = store();
        store.initialize().unwrap();
        let root = store.generate_initial(&model()).unwrap();
        let db = SqliteDatabase::open_in_memory().unwrap();

        let report = store.apply(&db).unwrap();
        assert_eq!(report.applied_count(), 1);
        assert!(db.has_table("ports").unwrap());
        assert_eq!(store.applied().unwrap(), Some(root.id));

        // Nothing left to do.
        assert!(store.apply(&db).unwrap().steps.is_empty());
    }

    #[test]
    fn test_apply_fails_fast() {
        let (_dir, store) = store();
        store.initialize().unwrap();
        let root = store.generate_initial(&model()).unwrap();

        let bad = MigrationStep::new(
            Some(root.id.clone()),
            "bad",
            vec![SchemaOperation::DropColumn {
                table: "nope".to_string(),
                column: "x".to_string(),
            }],
        );
        let bad = store.append(bad).unwrap();
        let after = MigrationStep::new(
            Some(bad.id.clone()),
            "after",
            vec![SchemaOperation::Execute {
                sql: "CREATE TABLE never (id INTEGER)".to_string(),
            }],
        );
        store.append(after).unwrap();

        let db = SqliteDatabase::open_in_memory().unwrap();
        let err = store.apply(&db).unwrap_err();
        match err {
            MigrationError::ApplyFailed {
                step_id,
                position,
                report,
                ..
            } => {
                assert_eq!(step_id, bad.id);
                assert_eq!(position, 2);
                assert_eq!(report.steps[0].outcome, StepOutcome::Applied);
                assert!(matches!(report.steps[1].outcome, StepOutcome::Failed(_)));
                assert_eq!(report.steps[2].outcome, StepOutcome::Skipped);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert_eq!(store.applied().unwrap(), Some(root.id));
        assert!(!db.has_table("never").unwrap());
    }

    #[test]
    fn test_tampered_chain_is_rejected() {
        let (_dir, store) = store();
        store.initialize().unwrap();
        store.generate_initial(&model()).unwrap();

        let orphan = MigrationStep::new(Some("ffffffffffff".to_string()), "orphan", Vec::new());
        let name = format!("0002_{}.json", orphan.id);
        write_json_atomic(&store.root().join("versions").join(name), &orphan).unwrap();

        assert!(matches!(
            store.chain(),
            Err(MigrationError::ChainBroken { position: 2, .. })
        ));
    }

    #[test]
    fn test_unknown_marker_is_corruption() {
        let (_dir, store) = store();
        store.initialize().unwrap();
        store.generate_initial(&model()).unwrap();
        store.write_marker(Some("000000000000")).unwrap();

        assert!(matches!(
            store.applied(),
            Err(MigrationError::StateCorrupted { .. })
        ));
    }
}
