// SPDX-License-Identifier: AGPL-3.0-or-later

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;

use crate::archive::container;
use crate::archive::{ArchiveError, ArchiveStore, SnapshotMetadata, METADATA_FILE_NAME};
use crate::config::{Configuration, DATABASE_FILE_NAME};
use crate::db::errors::SqlStoreError;
use crate::db::stores::RestoreRecord;
use crate::db::{connection_pool, database_file_path, Pool, SqlStore};
use crate::restore::RestoreError;
use crate::snapshot::{SnapshotBuilder, SnapshotInfo, SnapshotRequest};

/// Table queried to prove a restored database is usable.
const VERIFICATION_TABLE: &str = "usuarios";

/// Caller options for one restore run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Replace the live database file with the archived one.
    pub restore_database: bool,

    /// Replace the live uploads tree with the archived one.
    pub restore_uploads: bool,

    /// Capture a manual-provenance safety snapshot of current state before
    /// touching anything. Opting out removes the recovery path.
    pub safety_snapshot: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            restore_database: true,
            restore_uploads: true,
            safety_snapshot: true,
        }
    }
}

/// Pre-flight validation verdict, shaped for direct display in a UI.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Validation {
    /// Whether the archive can be restored.
    pub valid: bool,

    /// Human-readable rejection reason when it cannot.
    pub error: Option<String>,
}

/// Outcome of one sub-restore.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StepResult {
    /// Sub-restore name, `database` or `uploads`.
    pub step: String,

    /// Whether the sub-restore succeeded.
    pub success: bool,

    /// Human-readable detail.
    pub detail: String,
}

impl StepResult {
    fn new(step: &str, success: bool, detail: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            success,
            detail: detail.into(),
        }
    }
}

/// Result of a completed restore.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RestoreOutcome {
    /// File name of the restored archive.
    pub backup_name: String,

    /// ISO-8601 instant the restore ran.
    pub restored_at: String,

    /// The safety snapshot taken beforehand, when one was requested.
    pub safety_snapshot: Option<SnapshotInfo>,

    /// Metadata embedded in the restored archive.
    pub metadata: SnapshotMetadata,

    /// Per-step results for the database and uploads sub-restores.
    pub steps: Vec<StepResult>,
}

/// Safely replaces live state with a chosen archive's contents.
///
/// The database swap is atomic from the caller's perspective: either the
/// archived file is fully in place and verified queryable, or the previous
/// file is back byte for byte. A failed uploads swap is downgraded to a
/// warning since the database is the authoritative store.
#[derive(Clone, Debug)]
pub struct RestoreEngine {
    store: SqlStore,
    archive: ArchiveStore,
    builder: SnapshotBuilder,
    database_url: String,
    database_max_connections: u32,
    db_path: Option<PathBuf>,
    uploads_dir: PathBuf,
}

impl RestoreEngine {
    /// Returns a new engine working on the given store and archive catalog.
    pub fn new(store: SqlStore, archive: ArchiveStore, config: &Configuration) -> Self {
        let builder = SnapshotBuilder::new(
            store.clone(),
            archive.clone(),
            config.uploads_dir.clone(),
        );

        Self {
            store,
            archive,
            builder,
            database_url: config.database_url.clone(),
            database_max_connections: config.database_max_connections,
            db_path: database_file_path(&config.database_url),
            uploads_dir: config.uploads_dir.clone(),
        }
    }

    /// Runs archive validation in isolation, for pre-flight checks from a
    /// UI. Never mutates any state.
    pub fn validate(&self, path: &Path) -> Validation {
        match self.validate_archive(path) {
            Ok(_) => Validation {
                valid: true,
                error: None,
            },
            Err(err) => Validation {
                valid: false,
                error: Some(err.to_string()),
            },
        }
    }

    /// Restores live state from the archive at `path`.
    pub async fn restore(
        &self,
        path: &Path,
        options: &RestoreOptions,
    ) -> Result<RestoreOutcome, RestoreError> {
        // Validating: any violation aborts before any state is touched
        let (target, _) = self.validate_archive(path)?;
        let backup_name = target
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        info!("Starting restore from {}", backup_name);

        // SafetySnapshot: capture current state first so the restore itself
        // stays recoverable
        let safety_snapshot = if options.safety_snapshot {
            let request = SnapshotRequest::manual(format!(
                "Safety snapshot before restore from {}",
                backup_name
            ));
            match self.builder.create(request).await {
                Ok(info) => Some(info),
                Err(err) => return Err(RestoreError::SafetySnapshot(err)),
            }
        } else {
            None
        };

        // Extracting and the sub-restores run against a scratch directory
        // which is removed on every outcome
        let temp_dir = self.archive.create_temp_dir("restore")?;
        let result = self.run_steps(&target, &temp_dir, options).await;

        if let Err(err) = fs::remove_dir_all(&temp_dir) {
            warn!("Could not remove scratch directory {:?}: {}", temp_dir, err);
        }

        let (metadata, steps) = result?;

        // Logging: best-effort activity entry with the per-step breakdown
        self.store
            .log_activity(
                None,
                "RESTORE",
                "sistema",
                None,
                &json!({
                    "backup_name": backup_name,
                    "backup_metadata": metadata,
                    "restore_results": steps,
                }),
            )
            .await;

        info!("Restore from {} completed", backup_name);

        Ok(RestoreOutcome {
            backup_name,
            restored_at: Local::now().to_rfc3339(),
            safety_snapshot,
            metadata,
            steps,
        })
    }

    /// Reads back the most recent restore log entries, newest first.
    pub async fn history(&self, limit: u32) -> Result<Vec<RestoreRecord>, SqlStoreError> {
        self.store.restore_history(limit).await
    }

    /// Checks that `path` is a restorable archive: it exists inside the
    /// store root, ends in `.zip`, passes the container integrity check and
    /// holds both an application database and a parseable metadata
    /// descriptor.
    fn validate_archive(&self, path: &Path) -> Result<(PathBuf, SnapshotMetadata), ArchiveError> {
        if path.extension().map(|ext| ext != "zip").unwrap_or(true) {
            return Err(ArchiveError::NotAnArchive);
        }

        let target = self.archive.contained_path(path)?;

        let names = container::check_integrity(&target)?;
        if !container::contains_database(&names) {
            return Err(ArchiveError::MissingDatabase);
        }
        if !names.iter().any(|name| name == METADATA_FILE_NAME) {
            return Err(ArchiveError::MissingMetadata);
        }

        let metadata = container::read_metadata(&target)?;

        Ok((target, metadata))
    }

    async fn run_steps(
        &self,
        target: &Path,
        temp_dir: &Path,
        options: &RestoreOptions,
    ) -> Result<(SnapshotMetadata, Vec<StepResult>), RestoreError> {
        container::extract_to(target, temp_dir)?;

        let raw = fs::read_to_string(temp_dir.join(METADATA_FILE_NAME))?;
        let metadata: SnapshotMetadata = serde_json::from_str(&raw)
            .map_err(|err| ArchiveError::InvalidMetadata(err.to_string()))?;

        let mut steps = Vec::new();

        if options.restore_database {
            match self.restore_database(temp_dir).await {
                Ok(detail) => steps.push(StepResult::new("database", true, detail)),
                Err(err) => {
                    // Database correctness is the primary invariant, a
                    // failure here fails the whole restore
                    return Err(err);
                }
            }
        }

        if options.restore_uploads {
            match self.restore_uploads(temp_dir) {
                Ok(detail) => steps.push(StepResult::new("uploads", true, detail)),
                Err(err) => {
                    warn!("Restoring uploads failed: {}", err);
                    steps.push(StepResult::new("uploads", false, err.to_string()));
                }
            }
        }

        Ok((metadata, steps))
    }

    /// Swaps the live database file for the archived one.
    ///
    /// The current file is copied aside first; on any failure it is put back
    /// unchanged and a fresh pool is opened on it, so the application keeps
    /// running against the pre-restore state.
    async fn restore_database(&self, temp_dir: &Path) -> Result<String, RestoreError> {
        let source = temp_dir.join(DATABASE_FILE_NAME);
        if !source.exists() {
            return Err(RestoreError::Database(
                "Database file missing from extracted archive".to_string(),
            ));
        }

        let db_path = self.db_path.clone().ok_or(RestoreError::NoDatabaseFile)?;

        // Tear down every connection before the file is swapped underneath
        self.store.close().await;

        let aside = sibling_path(&db_path, ".pre_restore");
        let had_original = db_path.exists();
        if had_original {
            fs::copy(&db_path, &aside)?;
        }

        match self.swap_database_file(&source, &db_path).await {
            Ok(pool) => {
                self.store.replace_pool(pool).await;
                if had_original {
                    let _ = fs::remove_file(&aside);
                }

                Ok("Database restored".to_string())
            }
            Err(err) => {
                // Roll the original file back into place, byte for byte
                let _ = fs::remove_file(&db_path);
                if had_original {
                    if let Err(rollback_err) = fs::copy(&aside, &db_path) {
                        error!("Rolling back the database file failed: {}", rollback_err);
                    }
                    let _ = fs::remove_file(&aside);
                }

                // Reconnect onto the rolled-back database so the application
                // stays usable
                match connection_pool(&self.database_url, self.database_max_connections).await {
                    Ok(pool) => self.store.replace_pool(pool).await,
                    Err(pool_err) => {
                        error!("Could not reopen the rolled-back database: {}", pool_err)
                    }
                }

                Err(err)
            }
        }
    }

    async fn swap_database_file(&self, source: &Path, db_path: &Path) -> Result<Pool, RestoreError> {
        // Stale journal files must not survive into the restored database
        for suffix in ["-wal", "-shm", "-journal"].iter() {
            let _ = fs::remove_file(sibling_path(db_path, suffix));
        }

        if db_path.exists() {
            fs::remove_file(db_path)?;
        }
        fs::copy(source, db_path)?;

        let pool = connection_pool(&self.database_url, self.database_max_connections)
            .await
            .map_err(|err| RestoreError::Database(err.to_string()))?;

        // A trivial query proves the restored file is an intact database
        let verification = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM {}",
            VERIFICATION_TABLE
        ))
        .fetch_one(&pool)
        .await;

        match verification {
            Ok(_) => Ok(pool),
            Err(err) => {
                pool.close().await;
                Err(RestoreError::Database(format!(
                    "Verification query failed: {}",
                    err
                )))
            }
        }
    }

    /// Swaps the live uploads tree for the archived one. A no-op when the
    /// archive carries no uploads.
    fn restore_uploads(&self, temp_dir: &Path) -> Result<String, std::io::Error> {
        let source = temp_dir.join("uploads");
        if !source.exists() {
            return Ok("No uploads in archive".to_string());
        }

        let aside = sibling_path(
            &self.uploads_dir,
            &format!(".pre_restore_{}", Local::now().format("%Y%m%d_%H%M%S")),
        );
        let had_original = self.uploads_dir.exists();
        if had_original {
            fs::rename(&self.uploads_dir, &aside)?;
        }

        match container::copy_dir_recursive(&source, &self.uploads_dir) {
            Ok(count) => {
                if had_original {
                    let _ = fs::remove_dir_all(&aside);
                }

                Ok(format!("Restored {} uploaded files", count))
            }
            Err(err) => {
                let _ = fs::remove_dir_all(&self.uploads_dir);
                if had_original {
                    let _ = fs::rename(&aside, &self.uploads_dir);
                }

                Err(err)
            }
        }
    }
}

/// Sibling of `path` with `suffix` appended to its file name.
fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(suffix);

    path.with_file_name(name)
}
