// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::archive::ArchiveError;
use crate::snapshot::SnapshotError;

/// `RestoreEngine` errors.
#[derive(thiserror::Error, Debug)]
pub enum RestoreError {
    /// The archive failed validation or could not be unpacked. No live
    /// state was touched.
    #[error(transparent)]
    InvalidArchive(#[from] ArchiveError),

    /// The safety snapshot of current state could not be created; the
    /// restore did not proceed.
    #[error("Could not create safety snapshot: {0}")]
    SafetySnapshot(#[source] SnapshotError),

    /// Replacing the database failed. The previous database file was rolled
    /// back into place.
    #[error("Restoring the database failed: {0}")]
    Database(String),

    /// The configured database is not backed by a file which could be
    /// replaced (e.g. an in-memory database).
    #[error("The live database has no file to replace")]
    NoDatabaseFile,

    /// Error returned from the filesystem.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
