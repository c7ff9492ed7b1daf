// SPDX-License-Identifier: AGPL-3.0-or-later

//! # pacta-vault
//!
//! Backup, restore and change-tracking core for the PACTA contract
//! administration system. It snapshots the live SQLite database and uploaded
//! file tree into write-once zip archives, keeps a ledger of mutations to
//! decide whether a scheduled snapshot is worth running, prunes old archives
//! by retention policy and restores a chosen archive with a rollback path.
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]

mod archive;
mod bus;
mod config;
mod context;
mod db;
mod manager;
mod node;
mod restore;
mod scheduler;
mod snapshot;

#[cfg(test)]
mod test_helpers;

pub use crate::archive::{
    ArchiveEntry, ArchiveError, ArchiveListing, ArchiveStore, Provenance, PruneOutcome,
    RestorableArchive, SnapshotMetadata, METADATA_FILE_NAME,
};
pub use crate::bus::ServiceMessage;
pub use crate::config::{Configuration, DATABASE_FILE_NAME};
pub use crate::context::Context;
pub use crate::db::errors::SqlStoreError;
pub use crate::db::models::{ChangeGroupRow, DailyChangeRow};
pub use crate::db::stores::{
    ChangeOperation, ChangeSummary, LastBackup, PendingChanges, RestoreRecord, TRACKED_TABLES,
};
pub use crate::db::SqlStore;
pub use crate::node::Node;
pub use crate::restore::{
    RestoreEngine, RestoreError, RestoreOptions, RestoreOutcome, StepResult, Validation,
};
pub use crate::scheduler::{JobStatus, SchedulerError, SchedulerHandle, SchedulerStatus};
pub use crate::snapshot::{
    SnapshotBuilder, SnapshotError, SnapshotInfo, SnapshotRequest, STAT_TABLES,
};
