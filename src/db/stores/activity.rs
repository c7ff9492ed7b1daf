// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::Utc;
use log::warn;
use serde::Serialize;
use sqlx::{query, query_as};

use crate::db::errors::SqlStoreError;
use crate::db::models::ActivityRow;
use crate::db::SqlStore;

/// Outcome of one restore operation as read back from the activity log.
///
/// The referenced archive is a weak reference by name, it may have been
/// deleted since without affecting this record.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RestoreRecord {
    /// Instant the restore was logged.
    pub date: String,

    /// Detail payload: source archive name, its embedded metadata and the
    /// per-step results.
    pub details: serde_json::Value,
}

/// Most recent snapshot as recorded in the activity log.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LastBackup {
    /// Instant the snapshot was logged.
    pub date: String,

    /// Detail payload: archive name, byte size, reason.
    pub details: serde_json::Value,
}

/// Methods to interact with the `actividad_sistema` log in the database.
impl SqlStore {
    /// Appends one activity-log entry.
    ///
    /// Like change recording this is best-effort telemetry, failures are
    /// logged and reported through the returned flag only.
    pub async fn log_activity(
        &self,
        actor: Option<i64>,
        action: &str,
        table: &str,
        record_id: Option<i64>,
        details: &serde_json::Value,
    ) -> bool {
        let pool = self.pool().await;

        let result = query(
            "
            INSERT INTO
                actividad_sistema (
                    usuario_id,
                    accion,
                    tabla_afectada,
                    registro_id,
                    detalles,
                    fecha_actividad
                )
            VALUES
                (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(actor)
        .bind(action)
        .bind(table)
        .bind(record_id)
        .bind(details.to_string())
        .bind(Utc::now())
        .execute(&pool)
        .await;

        match result {
            Ok(_) => true,
            Err(err) => {
                warn!("Dropped activity-log entry {}: {}", action, err);
                false
            }
        }
    }

    /// Returns the most recent `RESTORE` entries, newest first.
    pub async fn restore_history(&self, limit: u32) -> Result<Vec<RestoreRecord>, SqlStoreError> {
        let pool = self.pool().await;

        let rows = query_as::<_, ActivityRow>(
            "
            SELECT
                fecha_actividad,
                detalles
            FROM
                actividad_sistema
            WHERE
                accion = 'RESTORE'
            ORDER BY
                fecha_actividad DESC
            LIMIT ?
            ",
        )
        .bind(limit)
        .fetch_all(&pool)
        .await
        .map_err(|err| SqlStoreError::TransactionFailed(err.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| RestoreRecord {
                date: row.fecha_actividad,
                details: parse_details(row.detalles),
            })
            .collect())
    }

    /// Returns the most recent `BACKUP_*` entry, when one exists.
    pub async fn last_backup(&self) -> Result<Option<LastBackup>, SqlStoreError> {
        let pool = self.pool().await;

        let row = query_as::<_, ActivityRow>(
            "
            SELECT
                fecha_actividad,
                detalles
            FROM
                actividad_sistema
            WHERE
                accion LIKE 'BACKUP_%'
            ORDER BY
                fecha_actividad DESC
            LIMIT 1
            ",
        )
        .fetch_optional(&pool)
        .await
        .map_err(|err| SqlStoreError::TransactionFailed(err.to_string()))?;

        Ok(row.map(|row| LastBackup {
            date: row.fecha_actividad,
            details: parse_details(row.detalles),
        }))
    }
}

/// Detail payloads written by older application versions may not be valid
/// JSON, fall back to an empty object like the rest of the application does.
fn parse_details(details: Option<String>) -> serde_json::Value {
    details
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_else(|| serde_json::json!({}))
}
