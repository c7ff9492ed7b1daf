// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::archive::Provenance;
use crate::manager::Sender;

/// Sender for cross-service communication bus.
pub type ServiceSender = Sender<ServiceMessage>;

/// Messages which can be sent on the communication bus.
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceMessage {
    /// A new archive was written into the archive store.
    SnapshotCreated {
        name: String,
        provenance: Provenance,
    },

    /// The daily backup job ran but found no pending ledger entries and
    /// created no archive.
    SnapshotSkipped,

    /// Retention pruning removed old scheduled archives.
    ArchivesPruned { deleted: usize, kept: usize },

    /// Ledger compaction purged old processed change entries.
    LedgerCompacted { deleted: u64 },
}
