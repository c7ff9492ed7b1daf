// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;

use chrono::Weekday;
use serde::Deserialize;

/// Name of the live SQLite database file inside the application root and
/// inside every archive.
pub const DATABASE_FILE_NAME: &str = "pacta_local.db";

/// Configuration object holding all important variables throughout the
/// application.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// URL / connection string to the SQLite database.
    pub database_url: String,

    /// Maximum number of connections that the database pool should maintain.
    pub database_max_connections: u32,

    /// Root directory of the archive store. Archives are partitioned into
    /// `automatic/`, `manual/` and `imported/` subdirectories below it.
    pub backup_dir: PathBuf,

    /// Directory holding files uploaded through the application. Snapshots
    /// include it when it exists; restores may replace it wholesale.
    pub uploads_dir: PathBuf,

    /// Hour (0-23) at which the daily backup job fires.
    pub daily_backup_hour: u32,

    /// Minute (0-59) at which the daily backup job fires.
    pub daily_backup_minute: u32,

    /// Hour (0-23) at which the daily archive-pruning job fires.
    pub prune_hour: u32,

    /// Minute (0-59) at which the daily archive-pruning job fires.
    pub prune_minute: u32,

    /// Weekday on which the ledger-compaction job fires.
    pub compaction_weekday: Weekday,

    /// Hour (0-23) at which the ledger-compaction job fires.
    pub compaction_hour: u32,

    /// Minute (0-59) at which the ledger-compaction job fires.
    pub compaction_minute: u32,

    /// Age in days after which a `scheduled` archive becomes a pruning
    /// candidate. `manual` and `imported` archives are never pruned.
    pub retention_days: u32,

    /// Number of most recent `scheduled` archives which are always kept,
    /// regardless of age.
    pub keep_minimum: usize,

    /// Age in days after which processed ledger entries are purged by the
    /// weekly compaction job.
    pub ledger_retention_days: u32,

    /// Grace window in seconds within which a late scheduled job still runs.
    /// A job delayed beyond this window is skipped until its next occurrence.
    pub misfire_grace_secs: u64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            database_url: format!("sqlite:{}", DATABASE_FILE_NAME),
            database_max_connections: 32,
            backup_dir: "backups".into(),
            uploads_dir: "uploads".into(),
            daily_backup_hour: 16,
            daily_backup_minute: 0,
            prune_hour: 5,
            prune_minute: 0,
            compaction_weekday: Weekday::Sun,
            compaction_hour: 3,
            compaction_minute: 0,
            retention_days: 7,
            keep_minimum: 3,
            ledger_retention_days: 30,
            misfire_grace_secs: 300,
        }
    }
}
