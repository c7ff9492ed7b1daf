// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::snapshot::SnapshotError;

/// `Scheduler` errors.
#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    /// A schedule was configured with an hour outside 0-23.
    #[error("Hour must be between 0 and 23, got {0}")]
    InvalidHour(u32),

    /// A schedule was configured with a minute outside 0-59.
    #[error("Minute must be between 0 and 59, got {0}")]
    InvalidMinute(u32),

    /// The scheduler service is not running (or was shut down), commands
    /// cannot be delivered.
    #[error("Scheduler service is not running")]
    NotRunning,

    /// A manually triggered snapshot failed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}
