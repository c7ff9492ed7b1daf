// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local};
use log::{debug, warn};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde::Serialize;

use crate::archive::container;
use crate::archive::{ArchiveError, Provenance, SnapshotMetadata, METADATA_FILE_NAME};

/// Name of the scratch directory below the store root. It never shows up in
/// listings because listings only look into the provenance subdirectories.
const TEMP_DIR_NAME: &str = "tmp";

/// One archive as shown in listings.
///
/// `archive_mtime` is filesystem truth and always present; the embedded
/// `metadata.created_at` may be absent for imported archives. Listings sort
/// and prune by `archive_mtime`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ArchiveEntry {
    /// Archive name (file stem, without the `.zip` suffix).
    pub name: String,

    /// Full path of the archive file.
    pub path: PathBuf,

    /// Provenance derived from the subdirectory holding the file.
    pub provenance: Provenance,

    /// Size of the container in bytes.
    pub size_bytes: u64,

    /// Size of the container in megabytes, rounded to two decimals.
    pub size_mb: f64,

    /// Modification time of the archive file.
    pub archive_mtime: DateTime<Local>,

    /// Embedded metadata, when present and parseable.
    pub metadata: Option<SnapshotMetadata>,
}

/// All archives in the store, grouped by provenance, newest first within
/// each group.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ArchiveListing {
    pub scheduled: Vec<ArchiveEntry>,
    pub manual: Vec<ArchiveEntry>,
    pub imported: Vec<ArchiveEntry>,
}

impl ArchiveListing {
    /// Total number of archives across all groups.
    pub fn total(&self) -> usize {
        self.scheduled.len() + self.manual.len() + self.imported.len()
    }
}

/// One archive offered for restoration, annotated with what it contains.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RestorableArchive {
    /// The underlying listing entry.
    pub entry: ArchiveEntry,

    /// Whether the container holds an uploaded file tree.
    pub has_uploads: bool,

    /// Row counts per table at capture time, when metadata is present.
    pub database_stats: Option<BTreeMap<String, i64>>,
}

/// Counts returned by retention pruning.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PruneOutcome {
    /// Number of scheduled archives deleted.
    pub deleted: usize,

    /// Number of scheduled archives kept.
    pub kept: usize,

    /// Retention threshold the run was invoked with.
    pub retention_days: u32,

    /// Keep floor the run was invoked with.
    pub keep_minimum: usize,
}

/// On-disk catalog of snapshot archives partitioned by provenance.
#[derive(Clone, Debug)]
pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    /// Opens the store at `root`, creating the root and all provenance
    /// subdirectories when missing.
    pub fn create(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();

        for provenance in Provenance::ALL.iter() {
            fs::create_dir_all(root.join(provenance.dir_name()))?;
        }

        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding archives of the given provenance.
    pub fn provenance_dir(&self, provenance: Provenance) -> PathBuf {
        self.root.join(provenance.dir_name())
    }

    /// Final path for a new archive of the given provenance and name.
    pub(crate) fn archive_path(&self, provenance: Provenance, name: &str) -> PathBuf {
        self.provenance_dir(provenance).join(format!("{}.zip", name))
    }

    /// Creates a fresh scratch directory below the store root. The name
    /// carries a second-granularity timestamp plus a random token so
    /// concurrent invocations cannot collide.
    pub(crate) fn create_temp_dir(&self, prefix: &str) -> std::io::Result<PathBuf> {
        let dir = self.root.join(TEMP_DIR_NAME).join(format!(
            "{}_{}_{}",
            prefix,
            Local::now().format("%Y%m%d_%H%M%S"),
            random_token()
        ));
        fs::create_dir_all(&dir)?;

        Ok(dir)
    }

    /// Resolves `path` and verifies it lives inside the store root, the
    /// defense against path traversal. Returns the canonicalized path.
    pub(crate) fn contained_path(&self, path: &Path) -> Result<PathBuf, ArchiveError> {
        let root = self.root.canonicalize()?;
        let target = path
            .canonicalize()
            .map_err(|_| ArchiveError::NotFound(path.to_path_buf()))?;

        if target.starts_with(&root) {
            Ok(target)
        } else {
            Err(ArchiveError::OutsideStore(path.to_path_buf()))
        }
    }

    /// Groups all archives by provenance, newest first within each group.
    pub fn list(&self) -> Result<ArchiveListing, ArchiveError> {
        Ok(ArchiveListing {
            scheduled: self.entries(Provenance::Scheduled)?,
            manual: self.entries(Provenance::Manual)?,
            imported: self.entries(Provenance::Imported)?,
        })
    }

    /// Flattened newest-first list of scheduled and manual archives offered
    /// for restoration, annotated with their contents.
    pub fn restorable(&self) -> Result<Vec<RestorableArchive>, ArchiveError> {
        let mut archives: Vec<ArchiveEntry> = self.entries(Provenance::Scheduled)?;
        archives.extend(self.entries(Provenance::Manual)?);
        archives.sort_by(|a, b| b.archive_mtime.cmp(&a.archive_mtime));

        Ok(archives
            .into_iter()
            .map(|entry| RestorableArchive {
                has_uploads: container::has_uploads(&entry.path),
                database_stats: entry
                    .metadata
                    .as_ref()
                    .map(|metadata| metadata.database_stats.clone()),
                entry,
            })
            .collect())
    }

    /// Accepts an uploaded archive file.
    ///
    /// The upload is copied below `imported/` under a collision-resistant
    /// name, then opened to verify it is a readable container holding a
    /// recognizable database file and a metadata descriptor. A rejected
    /// upload is deleted again, best-effort.
    pub fn import_external(
        &self,
        original_filename: &str,
        source: &Path,
    ) -> Result<ArchiveEntry, ArchiveError> {
        if original_filename.trim().is_empty() {
            return Err(ArchiveError::EmptyFileName);
        }
        if !original_filename.to_lowercase().ends_with(".zip") {
            return Err(ArchiveError::NotAnArchive);
        }

        let stem = Path::new(original_filename)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .ok_or(ArchiveError::EmptyFileName)?;

        let destination = self.provenance_dir(Provenance::Imported).join(format!(
            "imported_{}_{}.zip",
            stem,
            Local::now().format("%Y%m%d_%H%M%S")
        ));
        fs::copy(source, &destination)?;

        let names = match container::check_integrity(&destination) {
            Ok(names) => names,
            Err(err) => {
                remove_rejected_upload(&destination);
                return Err(err);
            }
        };

        if !container::contains_database(&names) {
            remove_rejected_upload(&destination);
            return Err(ArchiveError::MissingDatabase);
        }

        if !names.iter().any(|name| name == METADATA_FILE_NAME) {
            remove_rejected_upload(&destination);
            return Err(ArchiveError::MissingMetadata);
        }

        self.entry(&destination, Provenance::Imported)
    }

    /// Removes exactly one archive file.
    ///
    /// Refuses paths which do not resolve inside the store root and targets
    /// without a `.zip` suffix.
    pub fn delete(&self, path: &Path) -> Result<(), ArchiveError> {
        let target = self.contained_path(path)?;

        if target.extension().map(|ext| ext != "zip").unwrap_or(true) {
            return Err(ArchiveError::NotAnArchive);
        }

        fs::remove_file(&target)?;

        Ok(())
    }

    /// Applies the retention policy to `scheduled` archives: the
    /// `keep_minimum` newest are always kept, the rest are deleted once
    /// older than `retention_days`. `manual` and `imported` archives are
    /// never touched.
    pub fn prune(
        &self,
        retention_days: u32,
        keep_minimum: usize,
        now: DateTime<Local>,
    ) -> Result<PruneOutcome, ArchiveError> {
        let cutoff = now - Duration::days(retention_days as i64);

        let mut archives: Vec<(PathBuf, DateTime<Local>)> = self
            .entries(Provenance::Scheduled)?
            .into_iter()
            .map(|entry| (entry.path, entry.archive_mtime))
            .collect();
        archives.sort_by(|a, b| b.1.cmp(&a.1));

        let (expired, retained) = partition_by_retention(archives, cutoff, keep_minimum);

        let mut deleted = 0;
        let mut kept = retained.len();
        for path in expired {
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(err) => {
                    warn!("Failed to remove expired archive {:?}: {}", path, err);
                    kept += 1;
                }
            }
        }

        debug!(
            "Retention pruning deleted {} and kept {} scheduled archives",
            deleted, kept
        );

        Ok(PruneOutcome {
            deleted,
            kept,
            retention_days,
            keep_minimum,
        })
    }

    /// All archives of one provenance, newest first.
    fn entries(&self, provenance: Provenance) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let dir = self.provenance_dir(provenance);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for item in fs::read_dir(&dir)? {
            let path = item?.path();
            let is_zip = path.extension().map(|ext| ext == "zip").unwrap_or(false);
            if !path.is_file() || !is_zip {
                continue;
            }

            entries.push(self.entry(&path, provenance)?);
        }

        entries.sort_by(|a, b| b.archive_mtime.cmp(&a.archive_mtime));

        Ok(entries)
    }

    fn entry(&self, path: &Path, provenance: Provenance) -> Result<ArchiveEntry, ArchiveError> {
        let stat = fs::metadata(path)?;
        let size_bytes = stat.len();

        Ok(ArchiveEntry {
            name: path
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default(),
            path: path.to_path_buf(),
            provenance,
            size_bytes,
            size_mb: (size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
            archive_mtime: DateTime::from(stat.modified()?),
            metadata: container::try_read_metadata(path),
        })
    }
}

/// Splits newest-first `archives` into (to delete, to keep): the first
/// `keep_minimum` entries are always kept, the remainder is deleted when
/// older than `cutoff`.
fn partition_by_retention(
    archives: Vec<(PathBuf, DateTime<Local>)>,
    cutoff: DateTime<Local>,
    keep_minimum: usize,
) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut expired = Vec::new();
    let mut retained = Vec::new();

    for (index, (path, mtime)) in archives.into_iter().enumerate() {
        if index < keep_minimum || mtime >= cutoff {
            retained.push(path);
        } else {
            expired.push(path);
        }
    }

    (expired, retained)
}

/// Short random token making archive names unique beyond their
/// second-granularity timestamp.
pub(crate) fn random_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

fn remove_rejected_upload(path: &Path) {
    // A locked or already removed file is tolerated here, the rejection
    // result matters more than the leftover
    if let Err(err) = fs::remove_file(path) {
        warn!("Could not remove rejected upload {:?}: {}", path, err);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use chrono::{Duration, Local};
    use rstest::rstest;
    use tempfile::TempDir;

    use crate::archive::{ArchiveError, ArchiveStore, Provenance};
    use crate::test_helpers::{write_archive_fixture, write_bare_zip};

    use super::partition_by_retention;

    fn aged(days: i64) -> chrono::DateTime<Local> {
        Local::now() - Duration::days(days)
    }

    #[test]
    fn creates_provenance_directories() {
        let tmp = TempDir::new().unwrap();
        let store = ArchiveStore::create(tmp.path().join("backups")).unwrap();

        for provenance in Provenance::ALL.iter() {
            assert!(store.provenance_dir(*provenance).is_dir());
        }
    }

    #[test]
    fn lists_archives_grouped_and_sorted() {
        let tmp = TempDir::new().unwrap();
        let store = ArchiveStore::create(tmp.path().join("backups")).unwrap();

        write_archive_fixture(&store.provenance_dir(Provenance::Scheduled), "older");
        std::thread::sleep(std::time::Duration::from_millis(1100));
        write_archive_fixture(&store.provenance_dir(Provenance::Scheduled), "newer");
        write_archive_fixture(&store.provenance_dir(Provenance::Manual), "by_hand");

        let listing = store.list().unwrap();
        assert_eq!(listing.total(), 3);
        assert_eq!(listing.scheduled[0].name, "newer");
        assert_eq!(listing.scheduled[1].name, "older");
        assert_eq!(listing.manual[0].name, "by_hand");
        assert!(listing.imported.is_empty());

        // Fixture archives carry parseable metadata
        assert!(listing.manual[0].metadata.is_some());
        assert!(listing.manual[0].size_bytes > 0);
    }

    #[test]
    fn restorable_flattens_scheduled_and_manual() {
        let tmp = TempDir::new().unwrap();
        let store = ArchiveStore::create(tmp.path().join("backups")).unwrap();

        write_archive_fixture(&store.provenance_dir(Provenance::Scheduled), "auto");
        write_archive_fixture(&store.provenance_dir(Provenance::Manual), "by_hand");
        write_archive_fixture(&store.provenance_dir(Provenance::Imported), "foreign");

        let restorable = store.restorable().unwrap();
        assert_eq!(restorable.len(), 2);
        assert!(restorable.iter().all(|archive| archive.has_uploads));
        assert!(restorable
            .iter()
            .all(|archive| archive.database_stats.is_some()));
    }

    #[test]
    fn delete_refuses_paths_outside_the_store() {
        let tmp = TempDir::new().unwrap();
        let store = ArchiveStore::create(tmp.path().join("backups")).unwrap();

        let outside = tmp.path().join("victim.zip");
        fs::write(&outside, b"precious").unwrap();

        match store.delete(&outside) {
            Err(ArchiveError::OutsideStore(_)) => (),
            other => panic!("Expected outside-store rejection, got {:?}", other),
        }
        assert!(outside.exists());

        // Traversal through the store root must not escape either
        let sneaky = store
            .provenance_dir(Provenance::Manual)
            .join("../../victim.zip");
        assert!(matches!(
            store.delete(&sneaky),
            Err(ArchiveError::OutsideStore(_))
        ));
        assert!(outside.exists());
    }

    #[test]
    fn delete_refuses_non_zip_targets() {
        let tmp = TempDir::new().unwrap();
        let store = ArchiveStore::create(tmp.path().join("backups")).unwrap();

        let target = store.provenance_dir(Provenance::Manual).join("notes.txt");
        fs::write(&target, b"notes").unwrap();

        assert!(matches!(
            store.delete(&target),
            Err(ArchiveError::NotAnArchive)
        ));
        assert!(target.exists());
    }

    #[test]
    fn delete_removes_archives_inside_the_store() {
        let tmp = TempDir::new().unwrap();
        let store = ArchiveStore::create(tmp.path().join("backups")).unwrap();

        let path = write_archive_fixture(&store.provenance_dir(Provenance::Manual), "doomed");
        store.delete(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn import_accepts_well_formed_archives() {
        let tmp = TempDir::new().unwrap();
        let store = ArchiveStore::create(tmp.path().join("backups")).unwrap();

        let upload = write_archive_fixture(tmp.path(), "from_elsewhere");
        let entry = store
            .import_external("from_elsewhere.zip", &upload)
            .unwrap();

        assert_eq!(entry.provenance, Provenance::Imported);
        assert!(entry.name.starts_with("imported_from_elsewhere_"));
        assert!(entry.path.exists());
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn import_rejects_empty_filenames(#[case] filename: &str) {
        let tmp = TempDir::new().unwrap();
        let store = ArchiveStore::create(tmp.path().join("backups")).unwrap();
        let upload = write_archive_fixture(tmp.path(), "payload");

        assert!(matches!(
            store.import_external(filename, &upload),
            Err(ArchiveError::EmptyFileName)
        ));
    }

    #[test]
    fn import_rejects_non_zip_extensions() {
        let tmp = TempDir::new().unwrap();
        let store = ArchiveStore::create(tmp.path().join("backups")).unwrap();
        let upload = write_archive_fixture(tmp.path(), "payload");

        assert!(matches!(
            store.import_external("backup.tar.gz", &upload),
            Err(ArchiveError::NotAnArchive)
        ));
        assert!(store.list().unwrap().imported.is_empty());
    }

    #[test]
    fn import_rejects_archives_without_metadata() {
        let tmp = TempDir::new().unwrap();
        let store = ArchiveStore::create(tmp.path().join("backups")).unwrap();

        // Well-formed container holding a database but no descriptor
        let upload = write_bare_zip(tmp.path(), "no_meta", &[("pacta_local.db", b"db bytes")]);

        assert!(matches!(
            store.import_external("no_meta.zip", &upload),
            Err(ArchiveError::MissingMetadata)
        ));
        // The imported directory is left unchanged
        assert!(store.list().unwrap().imported.is_empty());
    }

    #[test]
    fn import_rejects_archives_without_database() {
        let tmp = TempDir::new().unwrap();
        let store = ArchiveStore::create(tmp.path().join("backups")).unwrap();

        let upload = write_bare_zip(tmp.path(), "no_db", &[("readme.txt", b"hello")]);

        assert!(matches!(
            store.import_external("no_db.zip", &upload),
            Err(ArchiveError::MissingDatabase)
        ));
        assert!(store.list().unwrap().imported.is_empty());
    }

    #[test]
    fn import_deletes_corrupt_uploads() {
        let tmp = TempDir::new().unwrap();
        let store = ArchiveStore::create(tmp.path().join("backups")).unwrap();

        let upload = tmp.path().join("garbage.zip");
        fs::write(&upload, b"this is not a zip container").unwrap();

        assert!(matches!(
            store.import_external("garbage.zip", &upload),
            Err(ArchiveError::Corrupt(_))
        ));
        assert!(store.list().unwrap().imported.is_empty());
    }

    #[test]
    fn prune_never_touches_manual_or_imported_archives() {
        let tmp = TempDir::new().unwrap();
        let store = ArchiveStore::create(tmp.path().join("backups")).unwrap();

        let manual = write_archive_fixture(&store.provenance_dir(Provenance::Manual), "by_hand");
        let imported =
            write_archive_fixture(&store.provenance_dir(Provenance::Imported), "foreign");

        // Far-future clock makes every archive older than any retention
        let outcome = store.prune(0, 0, aged(-3650)).unwrap();

        assert_eq!(outcome.deleted, 0);
        assert!(manual.exists());
        assert!(imported.exists());
    }

    #[test]
    fn prune_keeps_the_minimum_regardless_of_age() {
        let tmp = TempDir::new().unwrap();
        let store = ArchiveStore::create(tmp.path().join("backups")).unwrap();

        for name in ["one", "two", "three", "four"].iter() {
            write_archive_fixture(&store.provenance_dir(Provenance::Scheduled), name);
        }

        // All four are "ancient" relative to this clock, still three survive
        let outcome = store.prune(7, 3, aged(-365)).unwrap();

        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.kept, 3);
        assert_eq!(store.list().unwrap().scheduled.len(), 3);
    }

    #[test]
    fn prune_keeps_everything_within_retention() {
        let tmp = TempDir::new().unwrap();
        let store = ArchiveStore::create(tmp.path().join("backups")).unwrap();

        for name in ["one", "two", "three", "four", "five"].iter() {
            write_archive_fixture(&store.provenance_dir(Provenance::Scheduled), name);
        }

        let outcome = store.prune(7, 3, Local::now()).unwrap();

        assert_eq!(outcome.deleted, 0);
        assert_eq!(outcome.kept, 5);
    }

    // Spec scenario: ten scheduled archives aged 1-10 days, retention 5 days
    // with a keep floor of 3. The three newest (1-3 days) are kept by the
    // floor, ages 4 and 5 fall within retention, ages 6-10 are deleted.
    #[test]
    fn retention_partition_matches_policy() {
        let archives: Vec<(PathBuf, _)> = (1..=10)
            .map(|age| (PathBuf::from(format!("age_{}.zip", age)), aged(age)))
            .collect();

        let cutoff = Local::now() - Duration::days(5);
        let (expired, retained) = partition_by_retention(archives, cutoff, 3);

        let expired: Vec<String> = expired
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        assert_eq!(
            expired,
            vec![
                "age_6.zip",
                "age_7.zip",
                "age_8.zip",
                "age_9.zip",
                "age_10.zip"
            ]
        );
        assert_eq!(retained.len(), 5);
    }

    // The keep floor bounds deletions: never more than `count - minimum` go,
    // and the newest `minimum` always survive.
    #[rstest]
    #[case(0, 10)]
    #[case(3, 7)]
    #[case(10, 0)]
    #[case(15, 0)]
    fn retention_floor_bounds_deletions(#[case] keep_minimum: usize, #[case] max_deleted: usize) {
        let archives: Vec<(PathBuf, _)> = (1..=10)
            .map(|age| (PathBuf::from(format!("age_{}.zip", age)), aged(age)))
            .collect();

        // Everything is past retention with this cutoff
        let cutoff = Local::now() + Duration::days(1);
        let (expired, retained) = partition_by_retention(archives, cutoff, keep_minimum);

        assert_eq!(expired.len(), max_deleted);
        for age in 1..=keep_minimum.min(10) {
            let name = format!("age_{}.zip", age);
            assert!(retained.iter().any(|path| path.ends_with(&name)));
        }
    }
}
