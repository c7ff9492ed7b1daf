// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;

/// `ArchiveStore` and archive container errors.
#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    /// The requested archive file does not exist.
    #[error("Archive not found: {0}")]
    NotFound(PathBuf),

    /// The file is not a `.zip` archive.
    #[error("Only .zip archives are accepted")]
    NotAnArchive,

    /// An uploaded archive arrived without a file name.
    #[error("File name must not be empty")]
    EmptyFileName,

    /// The path does not resolve inside the archive store root.
    #[error("Path is outside of the archive store: {0}")]
    OutsideStore(PathBuf),

    /// The zip container is damaged or not a zip file at all.
    #[error("Archive container is corrupt: {0}")]
    Corrupt(String),

    /// The container does not hold a recognizable application database file.
    #[error("Archive does not contain the application database")]
    MissingDatabase,

    /// The container does not hold a metadata descriptor.
    #[error("Archive does not contain a metadata descriptor")]
    MissingMetadata,

    /// The metadata descriptor is present but not parseable.
    #[error("Archive metadata could not be parsed: {0}")]
    InvalidMetadata(String),

    /// Error returned from the filesystem.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
