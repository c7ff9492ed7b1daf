// SPDX-License-Identifier: AGPL-3.0-or-later

//! On-disk catalog of backup archives.
//!
//! Archives are write-once zip containers holding a raw copy of the live
//! database, the uploaded file tree (when one existed) and an embedded
//! metadata descriptor. They are partitioned by provenance into
//! subdirectories of the store root.
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod container;
mod errors;
mod metadata;
mod store;

pub use errors::ArchiveError;
pub use metadata::{SnapshotMetadata, METADATA_FILE_NAME};
pub use store::{ArchiveEntry, ArchiveListing, ArchiveStore, PruneOutcome, RestorableArchive};
pub(crate) use store::random_token;

/// Origin category of an archive.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Produced by the cron-driven daily backup job.
    ///
    /// The `automatic` alias accepts metadata written by earlier application
    /// versions.
    #[serde(alias = "automatic")]
    Scheduled,

    /// Produced by an operator, or as a safety snapshot right before a
    /// restore.
    Manual,

    /// Uploaded by an operator from outside the system.
    Imported,
}

impl Provenance {
    /// All provenances, in the order listings are grouped.
    pub const ALL: [Provenance; 3] = [Provenance::Scheduled, Provenance::Manual, Provenance::Imported];

    /// Name of the subdirectory below the store root holding archives of
    /// this provenance. Scheduled archives keep their historical `automatic`
    /// directory name.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Provenance::Scheduled => "automatic",
            Provenance::Manual => "manual",
            Provenance::Imported => "imported",
        }
    }

    /// Lower-case label used in archive names and metadata.
    pub fn label(&self) -> &'static str {
        match self {
            Provenance::Scheduled => "scheduled",
            Provenance::Manual => "manual",
            Provenance::Imported => "imported",
        }
    }

    /// Activity-log action for snapshots of this provenance.
    pub fn action(&self) -> &'static str {
        match self {
            Provenance::Scheduled => "BACKUP_SCHEDULED",
            Provenance::Manual => "BACKUP_MANUAL",
            Provenance::Imported => "BACKUP_IMPORTED",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
