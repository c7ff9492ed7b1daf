// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::{info, warn};
use serde::Serialize;
use serde_json::json;

use crate::archive::container;
use crate::archive::random_token;
use crate::archive::{ArchiveStore, Provenance, SnapshotMetadata, METADATA_FILE_NAME};
use crate::config::DATABASE_FILE_NAME;
use crate::db::SqlStore;
use crate::snapshot::SnapshotError;

/// Tables counted into the metadata descriptor's `database_stats`. A table
/// missing from the schema is reported as zero.
pub const STAT_TABLES: [&str; 8] = [
    "usuarios",
    "clientes",
    "contratos",
    "suplementos",
    "personas_responsables",
    "documentos_contratos",
    "actividad_sistema",
    "notificaciones",
];

/// What to capture and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    /// Provenance under which the archive is filed.
    pub provenance: Provenance,

    /// Human-supplied reason, recorded in metadata and the activity log.
    pub reason: String,

    /// Optional operator-supplied label. Sanitized before use; a label that
    /// sanitizes away entirely falls back to the default name grammar.
    pub custom_name: Option<String>,
}

impl SnapshotRequest {
    /// Request for the cron-driven daily backup job.
    pub fn scheduled(reason: impl Into<String>) -> Self {
        Self {
            provenance: Provenance::Scheduled,
            reason: reason.into(),
            custom_name: None,
        }
    }

    /// Request for an operator-triggered or safety snapshot.
    pub fn manual(reason: impl Into<String>) -> Self {
        Self {
            provenance: Provenance::Manual,
            reason: reason.into(),
            custom_name: None,
        }
    }

    /// Attaches an operator-supplied label.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.custom_name = Some(name.into());
        self
    }
}

/// Description of one written archive, returned to the caller and partially
/// mirrored into the activity log.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SnapshotInfo {
    /// Archive name without the `.zip` suffix.
    pub name: String,

    /// Final path of the archive inside the store.
    pub path: PathBuf,

    /// Provenance under which the archive was filed.
    pub provenance: Provenance,

    /// Size of the container in bytes.
    pub size_bytes: u64,

    /// ISO-8601 creation instant.
    pub created_at: String,

    /// Reason the snapshot was taken.
    pub reason: String,

    /// The embedded metadata descriptor.
    pub metadata: SnapshotMetadata,
}

/// Produces one immutable archive capturing current durable state: the live
/// database (copied online via `VACUUM INTO`), the uploads tree when one
/// exists, and a metadata descriptor.
#[derive(Clone, Debug)]
pub struct SnapshotBuilder {
    store: SqlStore,
    archive: ArchiveStore,
    uploads_dir: PathBuf,
}

impl SnapshotBuilder {
    /// Returns a new builder writing into `archive`.
    pub fn new(store: SqlStore, archive: ArchiveStore, uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            archive,
            uploads_dir: uploads_dir.into(),
        }
    }

    /// Builds one archive. The temporary working directory is removed on
    /// success and failure alike, so a failed attempt can simply be retried.
    pub async fn create(&self, request: SnapshotRequest) -> Result<SnapshotInfo, SnapshotError> {
        let now = Local::now();
        let timestamp = now.format("%Y%m%d_%H%M%S").to_string();
        let name = archive_name(&request, &timestamp);
        let path = self.archive.archive_path(request.provenance, &name);

        let working_dir = self.archive.create_temp_dir("snapshot")?;
        let result = self
            .build(&working_dir, &path, &request, &timestamp, &now)
            .await;

        if let Err(err) = fs::remove_dir_all(&working_dir) {
            warn!("Could not remove working directory {:?}: {}", working_dir, err);
        }

        let metadata = match result {
            Ok(metadata) => metadata,
            Err(err) => {
                // Never leave a half-written container behind
                let _ = fs::remove_file(&path);
                return Err(err);
            }
        };

        let size_bytes = fs::metadata(&path)?.len();

        self.store
            .log_activity(
                None,
                request.provenance.action(),
                "sistema",
                None,
                &json!({
                    "backup_name": name,
                    "size_bytes": size_bytes,
                    "reason": request.reason,
                }),
            )
            .await;

        info!(
            "Created {} archive {} ({} bytes)",
            request.provenance, name, size_bytes
        );

        Ok(SnapshotInfo {
            name,
            path,
            provenance: request.provenance,
            size_bytes,
            created_at: now.to_rfc3339(),
            reason: request.reason,
            metadata,
        })
    }

    async fn build(
        &self,
        working_dir: &Path,
        target: &Path,
        request: &SnapshotRequest,
        timestamp: &str,
        now: &DateTime<Local>,
    ) -> Result<SnapshotMetadata, SnapshotError> {
        // 1. Online copy of the live database, foreground connections keep
        // reading and writing meanwhile
        self.store
            .vacuum_into(&working_dir.join(DATABASE_FILE_NAME))
            .await?;

        // 2. Uploaded file tree, when one exists
        if self.uploads_dir.exists() {
            container::copy_dir_recursive(&self.uploads_dir, &working_dir.join("uploads"))?;
        }

        // 3. Metadata descriptor
        let metadata = SnapshotMetadata {
            backup_type: request.provenance,
            timestamp: timestamp.to_string(),
            created_at: now.to_rfc3339(),
            reason: request.reason.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database_stats: self.database_stats().await,
        };
        fs::write(
            working_dir.join(METADATA_FILE_NAME),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        // 4. Single compressed container at its final destination
        container::compress_dir(working_dir, target)?;

        Ok(metadata)
    }

    async fn database_stats(&self) -> BTreeMap<String, i64> {
        let mut stats = BTreeMap::new();
        for table in STAT_TABLES.iter() {
            stats.insert(table.to_string(), self.store.table_row_count(table).await);
        }

        stats
    }
}

/// Derives the archive name: a sanitized operator label or the provenance
/// default, followed by the compact timestamp and a short random token
/// disambiguating names beyond second granularity.
fn archive_name(request: &SnapshotRequest, timestamp: &str) -> String {
    let token = random_token();

    match request.custom_name.as_deref().map(sanitize_name) {
        Some(label) if !label.is_empty() => format!("{}_{}_{}", label, timestamp, token),
        _ => format!(
            "{}_backup_{}_{}",
            request.provenance.label(),
            timestamp,
            token
        ),
    }
}

/// Keeps only alphanumerics, spaces, dashes and underscores, then maps
/// spaces to underscores.
fn sanitize_name(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .collect();

    kept.trim().replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::archive::container;
    use crate::archive::Provenance;
    use crate::snapshot::SnapshotRequest;
    use crate::test_helpers::{snapshot_builder, test_node};

    use super::sanitize_name;

    #[rstest]
    #[case("Informe final", "Informe_final")]
    #[case("  padded  ", "padded")]
    #[case("q3/contratos: ¡revisión!", "q3contratos_revisin")]
    #[case("@@@", "")]
    fn sanitizes_custom_names(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize_name(raw), expected);
    }

    #[tokio::test]
    async fn creates_self_contained_archives() {
        let node = test_node().await;
        let builder = snapshot_builder(&node);

        let info = builder
            .create(SnapshotRequest::manual("before quarterly review"))
            .await
            .unwrap();

        assert_eq!(info.provenance, Provenance::Manual);
        assert!(info.path.exists());
        assert!(info.size_bytes > 0);
        assert!(info.name.starts_with("manual_backup_"));

        // The container holds database, uploads and descriptor
        let names = container::check_integrity(&info.path).unwrap();
        assert!(container::contains_database(&names));
        assert!(names.iter().any(|name| name == "backup_metadata.json"));
        assert!(container::has_uploads(&info.path));

        // Stats reflect the seeded business tables, a missing table is zero
        assert_eq!(info.metadata.database_stats.get("usuarios"), Some(&2));
        assert_eq!(info.metadata.database_stats.get("contratos"), Some(&3));
        assert_eq!(info.metadata.reason, "before quarterly review");

        // The activity log saw the snapshot
        let last = node.context.store.last_backup().await.unwrap().unwrap();
        assert_eq!(last.details["backup_name"], info.name.as_str());
    }

    #[tokio::test]
    async fn archive_file_names_are_sanitized() {
        let node = test_node().await;
        let builder = snapshot_builder(&node);

        let info = builder
            .create(
                SnapshotRequest::manual("operator request")
                    .with_name("través de la acción #7 (¡ya!)"),
            )
            .await
            .unwrap();

        // Only word characters survive in the file name
        assert!(info
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'));
        assert!(info.name.starts_with("travs_de_la_accin_7_ya_"));
    }

    #[tokio::test]
    async fn snapshots_without_uploads_directory_still_build() {
        let node = test_node().await;
        std::fs::remove_dir_all(&node.context.config.uploads_dir).unwrap();
        let builder = snapshot_builder(&node);

        let info = builder
            .create(SnapshotRequest::scheduled("nightly"))
            .await
            .unwrap();

        assert!(info.path.exists());
        assert!(!container::has_uploads(&info.path));
    }

    #[tokio::test]
    async fn working_directory_is_removed_after_success() {
        let node = test_node().await;
        let builder = snapshot_builder(&node);

        builder
            .create(SnapshotRequest::manual("tidy"))
            .await
            .unwrap();

        let tmp_root = node.context.config.backup_dir.join("tmp");
        let leftovers = std::fs::read_dir(&tmp_root)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn failures_clean_up_and_are_retryable() {
        let node = test_node().await;
        let builder = snapshot_builder(&node);

        // A closed pool makes the database copy fail
        node.context.store.close().await;
        let result = builder.create(SnapshotRequest::manual("doomed")).await;
        assert!(result.is_err());

        // No temp leftovers, no half-written archive
        let tmp_root = node.context.config.backup_dir.join("tmp");
        let leftovers = std::fs::read_dir(&tmp_root)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
        assert!(node.context.archive.list().unwrap().manual.is_empty());
    }
}
