// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::Serialize;
use sqlx::FromRow;

/// Aggregated view over unprocessed ledger entries, grouped by table and
/// operation.
#[derive(FromRow, Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeGroupRow {
    /// Name of the mutated business table.
    pub table_name: String,

    /// Mutation kind within this group.
    pub operation: String,

    /// Number of unprocessed entries in this group.
    pub count: i64,

    /// Oldest entry in the group.
    pub first_change: String,

    /// Newest entry in the group.
    pub last_change: String,
}

/// Aggregated per-day counts for the human-facing change summary.
#[derive(FromRow, Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DailyChangeRow {
    /// Name of the mutated business table.
    pub table_name: String,

    /// Mutation kind within this bucket.
    pub operation: String,

    /// Number of entries in this bucket.
    pub count: i64,

    /// Calendar date of the bucket.
    pub change_date: String,
}
