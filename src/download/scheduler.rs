use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::EntryStatus;

use super::placement::FilePlacement;

/// Tally of one download sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub attempted: usize,
    /// Transferred over the network.
    pub materialized: usize,
    /// Already on disk and adopted without a transfer.
    pub adopted: usize,
    /// Left pending for the next sweep.
    pub failed: usize,
    /// Most tasks that were transferring at the same instant.
    pub peak_concurrency: usize,
}

enum TaskOutcome {
    Transferred,
    Adopted,
    Failed,
}

/// Counts tasks currently past the concurrency gate.
#[derive(Default)]
struct ActiveGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ActiveGauge {
    fn enter(self: &Arc<Self>) -> ActiveGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveGuard(Arc::clone(self))
    }
}

struct ActiveGuard(Arc<ActiveGauge>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Drains every pending entry through a bounded pool of download tasks.
pub struct DownloadScheduler {
    repo: Arc<Repository>,
    placement: Arc<FilePlacement>,
}

impl DownloadScheduler {
    pub fn new(repo: Arc<Repository>, placement: Arc<FilePlacement>) -> Self {
        Self { repo, placement }
    }

    /// Starts a sweep in the background.
    pub fn spawn(self: Arc<Self>) -> DownloadHandle {
        DownloadHandle {
            task: tokio::spawn(async move { self.run().await }),
        }
    }

    /// Runs one sweep to completion.
    ///
    /// The pool size is read from settings once, up front. A failing entry is
    /// logged and stays `Pending`; it never stops its siblings.
    pub async fn run(&self) -> Result<DownloadReport> {
        let settings = Arc::new(self.repo.get_settings().await?);
        let pending = self.repo.entries_with_status(EntryStatus::Pending).await?;

        if pending.is_empty() {
            tracing::debug!("no pending entries");
            return Ok(DownloadReport::default());
        }

        let workers = settings.worker_count();
        tracing::info!(pending = pending.len(), workers, "starting download sweep");

        let gate = Arc::new(Semaphore::new(workers));
        let gauge = Arc::new(ActiveGauge::default());
        let mut tasks = JoinSet::new();
        let attempted = pending.len();

        for entry in pending {
            let gate = Arc::clone(&gate);
            let gauge = Arc::clone(&gauge);
            let repo = Arc::clone(&self.repo);
            let placement = Arc::clone(&self.placement);
            let settings = Arc::clone(&settings);

            tasks.spawn(async move {
                let Ok(_permit) = gate.acquire_owned().await else {
                    return TaskOutcome::Failed;
                };
                let _active = gauge.enter();

                match placement.materialize(&repo, &entry, &settings).await {
                    Ok(placed) if placed.transferred => TaskOutcome::Transferred,
                    Ok(_) => TaskOutcome::Adopted,
                    Err(e) => {
                        tracing::warn!(
                            entry_id = entry.id,
                            title = %entry.title,
                            url = %entry.remote_url,
                            "download failed, entry stays pending: {}",
                            e
                        );
                        TaskOutcome::Failed
                    }
                }
            });
        }

        let mut report = DownloadReport {
            attempted,
            ..DownloadReport::default()
        };
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(TaskOutcome::Transferred) => report.materialized += 1,
                Ok(TaskOutcome::Adopted) => report.adopted += 1,
                Ok(TaskOutcome::Failed) => report.failed += 1,
                Err(e) => {
                    tracing::error!("download task aborted: {}", e);
                    report.failed += 1;
                }
            }
        }
        report.peak_concurrency = gauge.peak.load(Ordering::SeqCst);

        tracing::info!(
            materialized = report.materialized,
            adopted = report.adopted,
            failed = report.failed,
            "download sweep finished"
        );
        Ok(report)
    }
}

/// A running sweep. Dropping the handle detaches it; `cancel` stops it and every transfer in flight.
pub struct DownloadHandle {
    task: JoinHandle<Result<DownloadReport>>,
}

impl DownloadHandle {
    pub async fn wait(self) -> Result<DownloadReport> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(AppError::Other(anyhow::anyhow!("download sweep cancelled"))),
            Err(e) => Err(AppError::Other(anyhow::anyhow!("download sweep panicked: {e}"))),
        }
    }

    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
