// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Local};
use log::{error, info, warn};
use serde::Serialize;

use crate::bus::{ServiceMessage, ServiceSender};
use crate::config::Configuration;
use crate::context::Context;
use crate::db::stores::TRACKED_TABLES;
use crate::scheduler::schedule::{DailySchedule, WeeklySchedule};
use crate::scheduler::SchedulerError;
use crate::snapshot::{SnapshotBuilder, SnapshotError, SnapshotInfo, SnapshotRequest};

/// The three recurring jobs the scheduler drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum JobKind {
    DailyBackup,
    PruneArchives,
    CompactLedger,
}

impl JobKind {
    pub(crate) fn id(&self) -> &'static str {
        match self {
            JobKind::DailyBackup => "daily_backup",
            JobKind::PruneArchives => "prune_archives",
            JobKind::CompactLedger => "compact_ledger",
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            JobKind::DailyBackup => "Daily change-driven backup",
            JobKind::PruneArchives => "Archive retention pruning",
            JobKind::CompactLedger => "Change-ledger compaction",
        }
    }
}

/// When a job recurs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cadence {
    Daily(DailySchedule),
    Weekly(WeeklySchedule),
}

impl Cadence {
    fn next_after(&self, now: DateTime<Local>) -> DateTime<Local> {
        match self {
            Cadence::Daily(schedule) => schedule.next_after(now),
            Cadence::Weekly(schedule) => schedule.next_after(now),
        }
    }

    fn label(&self) -> String {
        match self {
            Cadence::Daily(schedule) => schedule.label(),
            Cadence::Weekly(schedule) => schedule.label(),
        }
    }
}

/// One scheduled job with its next-run bookkeeping.
#[derive(Debug)]
struct Job {
    kind: JobKind,
    cadence: Cadence,
    next_run: DateTime<Local>,
}

/// State of one scheduled job as reported to operators.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JobStatus {
    /// Stable job identifier.
    pub id: String,

    /// Human-readable job name.
    pub name: String,

    /// Human-readable cadence.
    pub schedule: String,

    /// ISO-8601 instant of the next run.
    pub next_run: String,
}

/// The scheduler's job table.
#[derive(Debug)]
pub(crate) struct Jobs {
    jobs: Vec<Job>,
}

impl Jobs {
    /// Builds the job table from the configured times, validating them.
    pub(crate) fn from_config(
        config: &Configuration,
        now: DateTime<Local>,
    ) -> Result<Self, SchedulerError> {
        let backup = DailySchedule::new(config.daily_backup_hour, config.daily_backup_minute)?;
        let prune = DailySchedule::new(config.prune_hour, config.prune_minute)?;
        let compact = WeeklySchedule::new(
            config.compaction_weekday,
            config.compaction_hour,
            config.compaction_minute,
        )?;

        let jobs = vec![
            Job {
                kind: JobKind::DailyBackup,
                cadence: Cadence::Daily(backup),
                next_run: backup.next_after(now),
            },
            Job {
                kind: JobKind::PruneArchives,
                cadence: Cadence::Daily(prune),
                next_run: prune.next_after(now),
            },
            Job {
                kind: JobKind::CompactLedger,
                cadence: Cadence::Weekly(compact),
                next_run: compact.next_after(now),
            },
        ];

        Ok(Self { jobs })
    }

    /// The job due next.
    pub(crate) fn soonest(&self) -> (usize, JobKind, DateTime<Local>) {
        let (index, job) = self
            .jobs
            .iter()
            .enumerate()
            .min_by_key(|(_, job)| job.next_run)
            .expect("Job table is never empty");

        (index, job.kind, job.next_run)
    }

    /// Moves a fired (or skipped) job to its next occurrence.
    pub(crate) fn advance(&mut self, index: usize, now: DateTime<Local>) {
        let job = &mut self.jobs[index];
        job.next_run = job.cadence.next_after(now);
    }

    /// Atomically replaces the daily backup job's trigger.
    pub(crate) fn reschedule_daily_backup(
        &mut self,
        schedule: DailySchedule,
        now: DateTime<Local>,
    ) {
        for job in self.jobs.iter_mut() {
            if job.kind == JobKind::DailyBackup {
                job.cadence = Cadence::Daily(schedule);
                job.next_run = schedule.next_after(now);
            }
        }
    }

    /// Job table snapshot for operators.
    pub(crate) fn status(&self) -> Vec<JobStatus> {
        self.jobs
            .iter()
            .map(|job| JobStatus {
                id: job.kind.id().to_string(),
                name: job.kind.name().to_string(),
                schedule: job.cadence.label(),
                next_run: job.next_run.to_rfc3339(),
            })
            .collect()
    }
}

/// Runs one scheduled job to completion. Failures are logged, never
/// propagated: a failed run is simply retried at the next occurrence.
pub(crate) async fn run_job(kind: JobKind, context: &Context, tx: &ServiceSender) {
    match kind {
        JobKind::DailyBackup => daily_backup(context, tx).await,
        JobKind::PruneArchives => prune_archives(context, tx).await,
        JobKind::CompactLedger => compact_ledger(context, tx).await,
    }
}

/// The daily backup job: snapshot only when the ledger reports pending
/// changes on the tracked tables, then mark those entries processed.
async fn daily_backup(context: &Context, tx: &ServiceSender) {
    let pending = match context.store.pending_changes(&TRACKED_TABLES).await {
        Ok(pending) => pending,
        Err(err) => {
            error!("Could not query pending changes: {}", err);
            return;
        }
    };

    if !pending.has_changes {
        info!("No pending changes, skipping scheduled snapshot");
        let _ = tx.send(ServiceMessage::SnapshotSkipped);
        return;
    }

    info!(
        "{} pending changes detected, creating scheduled snapshot",
        pending.total_changes
    );

    let request = SnapshotRequest::scheduled(format!(
        "Scheduled snapshot, {} pending changes",
        pending.total_changes
    ));

    match builder_for(context).create(request).await {
        Ok(info) => {
            mark_ledger_processed(context).await;

            let _ = tx.send(ServiceMessage::SnapshotCreated {
                name: info.name,
                provenance: info.provenance,
            });
        }
        Err(err) => {
            // Retried on the next cron tick, there is no dead-letter queue
            error!("Scheduled snapshot failed: {}", err);
        }
    }
}

/// The daily pruning job applying the retention policy to scheduled
/// archives.
async fn prune_archives(context: &Context, tx: &ServiceSender) {
    let config = &context.config;

    match context
        .archive
        .prune(config.retention_days, config.keep_minimum, Local::now())
    {
        Ok(outcome) => {
            info!(
                "Retention pruning done, {} deleted, {} kept",
                outcome.deleted, outcome.kept
            );
            let _ = tx.send(ServiceMessage::ArchivesPruned {
                deleted: outcome.deleted,
                kept: outcome.kept,
            });
        }
        Err(err) => error!("Retention pruning failed: {}", err),
    }
}

/// The weekly compaction job purging old processed ledger entries.
async fn compact_ledger(context: &Context, tx: &ServiceSender) {
    match context
        .store
        .purge_processed_older_than(context.config.ledger_retention_days)
        .await
    {
        Ok(deleted) => {
            info!("Ledger compaction removed {} processed entries", deleted);
            let _ = tx.send(ServiceMessage::LedgerCompacted { deleted });
        }
        Err(err) => error!("Ledger compaction failed: {}", err),
    }
}

/// An operator-triggered immediate backup. Bypasses the pending-change check
/// and always runs; on success ledger entries are marked processed just like
/// after a scheduled snapshot.
pub(crate) async fn manual_backup(
    context: &Context,
    tx: &ServiceSender,
    custom_name: Option<String>,
    reason: Option<String>,
) -> Result<SnapshotInfo, SnapshotError> {
    let mut request = SnapshotRequest::manual(
        reason.unwrap_or_else(|| "Manual backup requested by operator".to_string()),
    );
    if let Some(name) = custom_name {
        request = request.with_name(name);
    }

    let info = builder_for(context).create(request).await?;

    mark_ledger_processed(context).await;

    let _ = tx.send(ServiceMessage::SnapshotCreated {
        name: info.name.clone(),
        provenance: info.provenance,
    });

    Ok(info)
}

fn builder_for(context: &Context) -> SnapshotBuilder {
    SnapshotBuilder::new(
        context.store.clone(),
        context.archive.clone(),
        context.config.uploads_dir.clone(),
    )
}

async fn mark_ledger_processed(context: &Context) {
    match context.store.mark_all_pending_as_processed().await {
        Ok(count) => info!("Marked {} ledger entries as processed", count),
        Err(err) => warn!("Could not mark ledger entries as processed: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Local, TimeZone, Weekday};
    use tokio::sync::broadcast;

    use crate::bus::ServiceMessage;
    use crate::db::stores::{ChangeOperation, TRACKED_TABLES};
    use crate::test_helpers::test_node;

    use super::{run_job, JobKind, Jobs};

    #[test]
    fn job_table_orders_by_due_time() {
        let config = crate::Configuration {
            daily_backup_hour: 16,
            daily_backup_minute: 0,
            prune_hour: 5,
            prune_minute: 0,
            compaction_weekday: Weekday::Sun,
            compaction_hour: 3,
            compaction_minute: 0,
            ..Default::default()
        };

        // Tuesday noon: the backup at 16:00 comes first
        let now = Local.with_ymd_and_hms(2023, 8, 1, 12, 0, 0).single().unwrap();
        let jobs = Jobs::from_config(&config, now).unwrap();

        let (_, kind, due) = jobs.soonest();
        assert_eq!(kind, JobKind::DailyBackup);
        assert!(due - now <= Duration::hours(4));
    }

    #[test]
    fn advancing_moves_to_the_next_occurrence() {
        let config = crate::Configuration::default();
        let now = Local.with_ymd_and_hms(2023, 8, 1, 12, 0, 0).single().unwrap();
        let mut jobs = Jobs::from_config(&config, now).unwrap();

        let (index, _, due) = jobs.soonest();
        jobs.advance(index, due);

        let (_, _, next_due) = jobs.soonest();
        assert!(next_due > due);
    }

    #[test]
    fn rescheduling_replaces_the_backup_trigger() {
        let config = crate::Configuration::default();
        let now = Local.with_ymd_and_hms(2023, 8, 1, 12, 0, 0).single().unwrap();
        let mut jobs = Jobs::from_config(&config, now).unwrap();

        let schedule = super::DailySchedule::new(23, 30).unwrap();
        jobs.reschedule_daily_backup(schedule, now);

        let status = jobs.status();
        let backup = status.iter().find(|job| job.id == "daily_backup").unwrap();
        assert_eq!(backup.schedule, "daily at 23:30");
    }

    #[test]
    fn rejects_out_of_range_configuration() {
        let config = crate::Configuration {
            daily_backup_hour: 25,
            ..Default::default()
        };

        assert!(Jobs::from_config(&config, Local::now()).is_err());
    }

    // Spec scenario: three unprocessed inserts on `contratos`, the daily job
    // produces exactly one scheduled archive and drains the pending view.
    #[tokio::test]
    async fn daily_job_snapshots_when_changes_are_pending() {
        let node = test_node().await;
        let (tx, mut rx) = broadcast::channel(8);

        for id in 1..=3 {
            node.context
                .store
                .record_change("contratos", ChangeOperation::Insert, Some(id), None)
                .await;
        }

        run_job(JobKind::DailyBackup, &node.context, &tx).await;

        let listing = node.context.archive.list().unwrap();
        assert_eq!(listing.scheduled.len(), 1);
        assert!(listing.scheduled[0]
            .name
            .starts_with("scheduled_backup_"));

        let pending = node
            .context
            .store
            .pending_changes(&TRACKED_TABLES)
            .await
            .unwrap();
        assert!(!pending.has_changes);

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServiceMessage::SnapshotCreated { .. }
        ));
    }

    // P1: no pending changes means the daily job creates zero archives.
    #[tokio::test]
    async fn daily_job_skips_without_pending_changes() {
        let node = test_node().await;
        let (tx, mut rx) = broadcast::channel(8);

        run_job(JobKind::DailyBackup, &node.context, &tx).await;

        assert_eq!(node.context.archive.list().unwrap().total(), 0);
        assert_eq!(rx.try_recv().unwrap(), ServiceMessage::SnapshotSkipped);
    }

    #[tokio::test]
    async fn manual_backup_bypasses_the_pending_check() {
        let node = test_node().await;
        let (tx, _rx) = broadcast::channel(8);

        // No pending changes at all, the manual trigger still runs
        let info = super::manual_backup(&node.context, &tx, None, None)
            .await
            .unwrap();

        assert!(info.path.exists());
        assert_eq!(node.context.archive.list().unwrap().manual.len(), 1);
    }

    #[tokio::test]
    async fn prune_job_reports_counts_on_the_bus() {
        let node = test_node().await;
        let (tx, mut rx) = broadcast::channel(8);

        run_job(JobKind::PruneArchives, &node.context, &tx).await;

        assert_eq!(
            rx.try_recv().unwrap(),
            ServiceMessage::ArchivesPruned { deleted: 0, kept: 0 }
        );
    }

    #[tokio::test]
    async fn compaction_job_reports_counts_on_the_bus() {
        let node = test_node().await;
        let (tx, mut rx) = broadcast::channel(8);

        run_job(JobKind::CompactLedger, &node.context, &tx).await;

        assert_eq!(
            rx.try_recv().unwrap(),
            ServiceMessage::LedgerCompacted { deleted: 0 }
        );
    }
}
