// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Duration, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use sqlx::{query, query_as};

use crate::db::errors::SqlStoreError;
use crate::db::models::{ChangeGroupRow, DailyChangeRow};
use crate::db::SqlStore;

/// Business tables whose mutations make a scheduled snapshot worth running.
pub const TRACKED_TABLES: [&str; 6] = [
    "usuarios",
    "clientes",
    "contratos",
    "suplementos",
    "personas_responsables",
    "documentos_contratos",
];

/// Kind of a recorded mutation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl ChangeOperation {
    /// Upper-case label as stored in the `operation` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Insert => "INSERT",
            ChangeOperation::Update => "UPDATE",
            ChangeOperation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Answer to the "pending since last snapshot?" question asked before every
/// scheduled snapshot.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PendingChanges {
    /// Whether any unprocessed entry exists for the queried tables.
    pub has_changes: bool,

    /// Total number of unprocessed entries across all groups.
    pub total_changes: i64,

    /// Unprocessed entries grouped by table and operation, newest first.
    pub groups: Vec<ChangeGroupRow>,
}

/// Per-day, per-table, per-operation counts for a trailing window.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChangeSummary {
    /// Buckets keyed by calendar date, newest date last (map order).
    pub per_day: BTreeMap<String, Vec<DailyChangeRow>>,

    /// Total number of entries inside the window.
    pub total_changes: i64,

    /// Length of the trailing window in days.
    pub period_days: u32,
}

/// Methods to interact with the `change_tracking` ledger in the database.
impl SqlStore {
    /// Appends one ledger entry for a mutation on `table`.
    ///
    /// Change tracking is best-effort telemetry: a failed insert is logged
    /// and reported through the returned flag but never surfaces as an error,
    /// so the caller's business operation cannot be failed by it.
    pub async fn record_change(
        &self,
        table: &str,
        operation: ChangeOperation,
        record_id: Option<i64>,
        payload: Option<&serde_json::Value>,
    ) -> bool {
        match self.insert_change(table, operation, record_id, payload).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    "Dropped change record for {} {}: {}",
                    operation, table, err
                );
                false
            }
        }
    }

    async fn insert_change(
        &self,
        table: &str,
        operation: ChangeOperation,
        record_id: Option<i64>,
        payload: Option<&serde_json::Value>,
    ) -> Result<(), SqlStoreError> {
        let pool = self.pool().await;
        let change_data = payload.map(|value| value.to_string());

        query(
            "
            INSERT INTO
                change_tracking (
                    table_name,
                    operation,
                    record_id,
                    change_data,
                    timestamp
                )
            VALUES
                (?, ?, ?, ?, ?)
            ",
        )
        .bind(table)
        .bind(operation.as_str())
        .bind(record_id)
        .bind(change_data)
        .bind(Utc::now())
        .execute(&pool)
        .await
        .map_err(|err| SqlStoreError::TransactionFailed(err.to_string()))?;

        Ok(())
    }

    /// Returns whether any unprocessed entry exists for the given table set,
    /// together with grouped counts and first/last timestamps per group.
    pub async fn pending_changes(
        &self,
        tables: &[&str],
    ) -> Result<PendingChanges, SqlStoreError> {
        let pool = self.pool().await;

        let placeholders = vec!["?"; tables.len()].join(", ");
        let sql = format!(
            "
            SELECT
                table_name,
                operation,
                COUNT(*) AS count,
                MIN(timestamp) AS first_change,
                MAX(timestamp) AS last_change
            FROM
                change_tracking
            WHERE
                backup_processed = 0
                AND table_name IN ({})
            GROUP BY
                table_name, operation
            ORDER BY
                last_change DESC
            ",
            placeholders
        );

        let mut statement = query_as::<_, ChangeGroupRow>(&sql);
        for table in tables {
            statement = statement.bind(*table);
        }

        let groups = statement
            .fetch_all(&pool)
            .await
            .map_err(|err| SqlStoreError::TransactionFailed(err.to_string()))?;

        let total_changes = groups.iter().map(|group| group.count).sum();

        Ok(PendingChanges {
            has_changes: !groups.is_empty(),
            total_changes,
            groups,
        })
    }

    /// Bulk flips `backup_processed` for every currently unprocessed entry
    /// and returns how many were flipped.
    ///
    /// Must be called once, right after a snapshot archive was durably
    /// written. Entries recorded while the snapshot was being built are
    /// flipped as well even though the snapshot may not contain them; such a
    /// mutation is only guaranteed to be part of the _next_ archive's file
    /// content. This matches the behavior the application always had.
    pub async fn mark_all_pending_as_processed(&self) -> Result<u64, SqlStoreError> {
        let pool = self.pool().await;

        let result = query(
            "
            UPDATE
                change_tracking
            SET
                backup_processed = 1
            WHERE
                backup_processed = 0
            ",
        )
        .execute(&pool)
        .await
        .map_err(|err| SqlStoreError::TransactionFailed(err.to_string()))?;

        Ok(result.rows_affected())
    }

    /// Per-day, per-table, per-operation counts over the trailing `days`
    /// window, used for human-facing change reports.
    pub async fn summarize(&self, days: u32) -> Result<ChangeSummary, SqlStoreError> {
        let pool = self.pool().await;
        let cutoff = Utc::now() - Duration::days(days as i64);

        let rows = query_as::<_, DailyChangeRow>(
            "
            SELECT
                table_name,
                operation,
                COUNT(*) AS count,
                DATE(timestamp) AS change_date
            FROM
                change_tracking
            WHERE
                timestamp >= ?
            GROUP BY
                table_name, operation, DATE(timestamp)
            ORDER BY
                change_date DESC, table_name, operation
            ",
        )
        .bind(cutoff)
        .fetch_all(&pool)
        .await
        .map_err(|err| SqlStoreError::TransactionFailed(err.to_string()))?;

        let total_changes = rows.iter().map(|row| row.count).sum();

        let mut per_day: BTreeMap<String, Vec<DailyChangeRow>> = BTreeMap::new();
        for row in rows {
            per_day.entry(row.change_date.clone()).or_default().push(row);
        }

        Ok(ChangeSummary {
            per_day,
            total_changes,
            period_days: days,
        })
    }

    /// Deletes processed entries older than the cutoff and returns how many
    /// were removed. Unprocessed entries are never purged.
    pub async fn purge_processed_older_than(&self, days: u32) -> Result<u64, SqlStoreError> {
        let pool = self.pool().await;
        let cutoff = Utc::now() - Duration::days(days as i64);

        let result = query(
            "
            DELETE FROM
                change_tracking
            WHERE
                timestamp < ?
                AND backup_processed = 1
            ",
        )
        .bind(cutoff)
        .execute(&pool)
        .await
        .map_err(|err| SqlStoreError::TransactionFailed(err.to_string()))?;

        Ok(result.rows_affected())
    }
}
