// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::{anyhow, Result};
use chrono::{Duration, Local};
use log::{info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

use crate::bus::ServiceSender;
use crate::context::Context;
use crate::manager::Shutdown;
use crate::scheduler::jobs::{manual_backup, run_job, Jobs};
use crate::scheduler::schedule::DailySchedule;
use crate::scheduler::{JobStatus, SchedulerError};
use crate::snapshot::{SnapshotError, SnapshotInfo};

/// Commands operators can send into the running scheduler.
#[derive(Debug)]
pub(crate) enum SchedulerCommand {
    /// Run an immediate manual backup, bypassing the pending-change check.
    TriggerBackup {
        custom_name: Option<String>,
        reason: Option<String>,
        reply: oneshot::Sender<Result<SnapshotInfo, SnapshotError>>,
    },

    /// Replace the daily backup job's trigger time.
    RescheduleDailyBackup {
        hour: u32,
        minute: u32,
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },

    /// Report the job table.
    Status {
        reply: oneshot::Sender<SchedulerStatus>,
    },
}

/// State of the scheduler as reported to operators.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SchedulerStatus {
    /// All scheduled jobs with their next-run instants.
    pub jobs: Vec<JobStatus>,
}

/// Handle for sending commands into the scheduler service.
///
/// Commands are executed inside the scheduler's own loop, so a manual
/// trigger can never run concurrently with a scheduled job.
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub(crate) fn new(tx: mpsc::Sender<SchedulerCommand>) -> Self {
        Self { tx }
    }

    /// Runs an immediate manual backup and waits for its result.
    pub async fn trigger_backup(
        &self,
        custom_name: Option<String>,
        reason: Option<String>,
    ) -> Result<SnapshotInfo, SchedulerError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(SchedulerCommand::TriggerBackup {
                custom_name,
                reason,
                reply,
            })
            .await
            .map_err(|_| SchedulerError::NotRunning)?;

        let result = response.await.map_err(|_| SchedulerError::NotRunning)?;
        Ok(result?)
    }

    /// Replaces the daily backup job's trigger. Hour and minute are
    /// validated before anything changes.
    pub async fn reschedule_daily_backup(
        &self,
        hour: u32,
        minute: u32,
    ) -> Result<(), SchedulerError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(SchedulerCommand::RescheduleDailyBackup {
                hour,
                minute,
                reply,
            })
            .await
            .map_err(|_| SchedulerError::NotRunning)?;

        response.await.map_err(|_| SchedulerError::NotRunning)?
    }

    /// Reports the job table with next-run instants.
    pub async fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(SchedulerCommand::Status { reply })
            .await
            .map_err(|_| SchedulerError::NotRunning)?;

        response.await.map_err(|_| SchedulerError::NotRunning)
    }
}

/// Background service driving time-based snapshots, retention pruning and
/// ledger compaction.
///
/// A single loop owns all jobs and operator commands, which makes it the
/// width-1 execution pool the backup core requires: at most one of
/// {scheduled job, manual trigger} runs at any time, and shutdown waits for
/// whatever is in flight.
pub async fn scheduler_service(
    context: Context,
    shutdown: Shutdown,
    tx: ServiceSender,
) -> Result<()> {
    let mut commands = context
        .take_scheduler_commands()
        .await
        .ok_or_else(|| anyhow!("Scheduler service was started twice"))?;

    let mut jobs = Jobs::from_config(&context.config, Local::now())?;
    let grace = Duration::seconds(context.config.misfire_grace_secs as i64);

    for job in jobs.status() {
        info!("Scheduled {} ({}), next run {}", job.name, job.schedule, job.next_run);
    }

    let mut shutdown = shutdown;

    loop {
        let (index, kind, due) = jobs.soonest();
        let wait = (due - Local::now())
            .to_std()
            .unwrap_or_else(|_| std::time::Duration::from_secs(0));

        tokio::select! {
            _ = &mut shutdown => break,

            command = commands.recv() => match command {
                Some(command) => handle_command(command, &context, &tx, &mut jobs).await,
                None => break,
            },

            _ = sleep(wait) => {
                let now = Local::now();

                if now - due > grace {
                    // The driver was busy past the grace window, skip this
                    // occurrence instead of firing arbitrarily late
                    warn!(
                        "Missed {} by more than the grace window, skipping until its next occurrence",
                        kind.name()
                    );
                } else {
                    run_job(kind, &context, &tx).await;
                }

                jobs.advance(index, Local::now());
            }
        }
    }

    info!("Scheduler service stopped");

    Ok(())
}

async fn handle_command(
    command: SchedulerCommand,
    context: &Context,
    tx: &ServiceSender,
    jobs: &mut Jobs,
) {
    match command {
        SchedulerCommand::TriggerBackup {
            custom_name,
            reason,
            reply,
        } => {
            let result = manual_backup(context, tx, custom_name, reason).await;
            let _ = reply.send(result);
        }

        SchedulerCommand::RescheduleDailyBackup {
            hour,
            minute,
            reply,
        } => {
            let result = DailySchedule::new(hour, minute).map(|schedule| {
                jobs.reschedule_daily_backup(schedule, Local::now());
                info!("Daily backup rescheduled to {:02}:{:02}", hour, minute);
            });
            let _ = reply.send(result);
        }

        SchedulerCommand::Status { reply } => {
            let _ = reply.send(SchedulerStatus { jobs: jobs.status() });
        }
    }
}
