// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::archive::Provenance;

/// Name of the metadata descriptor inside every archive.
pub const METADATA_FILE_NAME: &str = "backup_metadata.json";

/// Descriptor embedded into every archive, describing how and when it was
/// captured.
///
/// `created_at` is the embedded creation instant and may be absent or stale
/// for imported archives; listings sort by the archive file's modification
/// time instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotMetadata {
    /// Provenance of the archive at capture time.
    pub backup_type: Provenance,

    /// Compact `YYYYMMDD_HHMMSS` timestamp, same as in the archive name.
    pub timestamp: String,

    /// ISO-8601 creation instant.
    pub created_at: String,

    /// Human-supplied reason for the snapshot.
    pub reason: String,

    /// Version of the application that wrote the archive.
    pub version: String,

    /// Row count per tracked table at capture time. Tables missing from the
    /// schema are reported as zero.
    #[serde(default)]
    pub database_stats: BTreeMap<String, i64>,
}
