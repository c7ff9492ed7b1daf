// SPDX-License-Identifier: AGPL-3.0-or-later

//! Store methods on [`crate::db::SqlStore`], grouped per concern: the change
//! ledger and the system activity log.
mod activity;
mod change;

pub use activity::{LastBackup, RestoreRecord};
pub use change::{ChangeOperation, ChangeSummary, PendingChanges, TRACKED_TABLES};
