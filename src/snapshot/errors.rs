// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::archive::ArchiveError;
use crate::db::errors::SqlStoreError;

/// `SnapshotBuilder` errors.
#[derive(thiserror::Error, Debug)]
pub enum SnapshotError {
    /// Copying the live database into the working directory failed.
    #[error("Database copy failed: {0}")]
    Database(#[from] SqlStoreError),

    /// Packing the working directory into the archive container failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// The metadata descriptor could not be encoded.
    #[error("Failed to encode snapshot metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Error returned from the filesystem.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
