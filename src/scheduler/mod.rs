// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cron-like background driver for snapshots, retention pruning and ledger
//! compaction.
mod errors;
mod jobs;
mod schedule;
mod service;

pub use errors::SchedulerError;
pub use jobs::JobStatus;
pub use service::{SchedulerHandle, SchedulerStatus};

pub(crate) use service::{scheduler_service, SchedulerCommand};
