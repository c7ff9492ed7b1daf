// SPDX-License-Identifier: AGPL-3.0-or-later

//! Packing, unpacking and inspection of archive containers.
use std::fs::File;
use std::io;
use std::path::Path;

use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::archive::{ArchiveError, SnapshotMetadata, METADATA_FILE_NAME};

/// Database entry names recognized inside an archive. Archives written by
/// earlier application versions used `database.db`.
pub const DATABASE_ENTRY_NAMES: [&str; 2] = ["pacta_local.db", "database.db"];

/// Prefix of upload-tree entries inside an archive.
pub const UPLOADS_ENTRY_PREFIX: &str = "uploads/";

/// Compresses every file below `source` into a single zip container at
/// `target`, with entry names relative to `source`.
pub fn compress_dir(source: &Path, target: &Path) -> Result<(), ArchiveError> {
    let file = File::create(target)?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(source)
            .expect("Walked path is below its root");

        writer
            .start_file(relative.to_string_lossy(), options)
            .map_err(|err| ArchiveError::Corrupt(err.to_string()))?;

        let mut reader = File::open(entry.path())?;
        io::copy(&mut reader, &mut writer)?;
    }

    writer
        .finish()
        .map_err(|err| ArchiveError::Corrupt(err.to_string()))?;

    Ok(())
}

/// Unpacks the whole container into `target`.
pub fn extract_to(archive: &Path, target: &Path) -> Result<(), ArchiveError> {
    let file = File::open(archive)?;
    let mut container =
        ZipArchive::new(file).map_err(|err| ArchiveError::Corrupt(err.to_string()))?;

    container
        .extract(target)
        .map_err(|err| ArchiveError::Corrupt(err.to_string()))?;

    Ok(())
}

/// Verifies container integrity by decompressing every entry (which checks
/// the stored checksums) and returns the entry names.
pub fn check_integrity(archive: &Path) -> Result<Vec<String>, ArchiveError> {
    let file = File::open(archive)?;
    let mut container =
        ZipArchive::new(file).map_err(|err| ArchiveError::Corrupt(err.to_string()))?;

    let mut names = Vec::with_capacity(container.len());
    for index in 0..container.len() {
        let mut entry = container
            .by_index(index)
            .map_err(|err| ArchiveError::Corrupt(err.to_string()))?;
        names.push(entry.name().to_string());

        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| ArchiveError::Corrupt(err.to_string()))?;
    }

    Ok(names)
}

/// Reads and parses the embedded metadata descriptor.
pub fn read_metadata(archive: &Path) -> Result<SnapshotMetadata, ArchiveError> {
    let file = File::open(archive)?;
    let mut container =
        ZipArchive::new(file).map_err(|err| ArchiveError::Corrupt(err.to_string()))?;

    let entry = match container.by_name(METADATA_FILE_NAME) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Err(ArchiveError::MissingMetadata),
        Err(err) => return Err(ArchiveError::Corrupt(err.to_string())),
    };

    serde_json::from_reader(entry).map_err(|err| ArchiveError::InvalidMetadata(err.to_string()))
}

/// Like [`read_metadata`] but folds every failure into `None`, for listings
/// where imported archives may legitimately carry no or foreign metadata.
pub fn try_read_metadata(archive: &Path) -> Option<SnapshotMetadata> {
    read_metadata(archive).ok()
}

/// Whether the entry names contain a recognizable application database file.
pub fn contains_database(names: &[String]) -> bool {
    names.iter().any(|name| {
        DATABASE_ENTRY_NAMES
            .iter()
            .any(|candidate| name == candidate || name.ends_with(&format!("/{}", candidate)))
    })
}

/// Whether the container holds an uploaded file tree.
pub fn has_uploads(archive: &Path) -> bool {
    let file = match File::open(archive) {
        Ok(file) => file,
        Err(_) => return false,
    };
    let container = match ZipArchive::new(file) {
        Ok(container) => container,
        Err(_) => return false,
    };

    let has_uploads = container
        .file_names()
        .any(|name| name.starts_with(UPLOADS_ENTRY_PREFIX));
    has_uploads
}

/// Recursively copies the file tree below `source` into `target`, creating
/// directories as needed. Returns the number of files copied.
pub fn copy_dir_recursive(source: &Path, target: &Path) -> io::Result<u64> {
    let mut copied = 0;

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .expect("Walked path is below its root");
        let destination = target.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &destination)?;
            copied += 1;
        }
    }

    Ok(copied)
}
