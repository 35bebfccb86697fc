use std::fmt::Debug;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::db::Repository;
use crate::download::{DownloadReport, DownloadScheduler, FilePlacement};
use crate::error::{AppError, Result};
use crate::feed::FeedFetcher;
use crate::http::build_client;
use crate::jobs::{self, ConsistencySweeps, JobLockManager, JobOutcome, MissingFilesReport, SizeReport};
use crate::models::{EntryStatus, Feed, JobName, Settings};
use crate::sync::{RefreshReport, RefreshService};

const BACKUP_INTERVAL: Duration = Duration::from_secs(2 * 24 * 60 * 60);
const UNLOCK_INTERVAL: Duration = Duration::from_secs(3 * 60);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub missing: MissingFilesReport,
    /// Episode images stored by the image backfill that follows the check.
    pub images_stored: usize,
}

/// Wires the store, the HTTP client and the job runners together.
///
/// Every periodic operation runs under its named job lock and reports
/// `JobOutcome::Skipped` instead of overlapping with itself.
pub struct App {
    repo: Arc<Repository>,
    locks: JobLockManager,
    refresh: RefreshService,
    scheduler: DownloadScheduler,
    sweeps: ConsistencySweeps,
    backup_dir: PathBuf,
    backup_keep: usize,
    refresh_interval: Duration,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let repository = Repository::new(&config.db_path).await?;
        Self::with_repository(config, Arc::new(repository))
    }

    pub fn with_repository(config: &Config, repo: Arc<Repository>) -> Result<Self> {
        let client = build_client(config)?;
        let placement = Arc::new(FilePlacement::new(&config.storage_root, client.clone()));

        Ok(Self {
            locks: JobLockManager::new(Arc::clone(&repo)),
            refresh: RefreshService::new(
                Arc::clone(&repo),
                FeedFetcher::new(client),
                Arc::clone(&placement),
                config.feed_fetch_concurrency,
            ),
            scheduler: DownloadScheduler::new(Arc::clone(&repo), Arc::clone(&placement)),
            sweeps: ConsistencySweeps::new(Arc::clone(&repo), placement),
            backup_dir: config.backup_dir.clone(),
            backup_keep: config.backup_keep,
            refresh_interval: Duration::from_secs(u64::from(config.refresh_interval_minutes.max(1)) * 60),
            repo,
        })
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    // Jobs

    /// Subscribes to a feed and queues its first downloads according to settings.
    pub async fn add_feed(&self, url: &str) -> Result<Feed> {
        self.refresh.add_feed(url).await
    }

    /// Refreshes every feed, then drains whatever the refresh queued.
    pub async fn refresh_all(&self) -> Result<JobOutcome<RefreshReport>> {
        let outcome = self
            .locks
            .run_exclusive(JobName::RefreshEpisodes, || self.refresh.refresh_all())
            .await?;

        if let JobOutcome::Completed(report) = &outcome {
            if report.queued > 0 {
                log_outcome(JobName::DownloadMissingEpisodes, self.download_pending().await);
            }
        }
        Ok(outcome)
    }

    pub async fn download_pending(&self) -> Result<JobOutcome<DownloadReport>> {
        self.locks
            .run_exclusive(JobName::DownloadMissingEpisodes, || self.scheduler.run())
            .await
    }

    /// Re-queues every soft-removed entry and downloads it.
    pub async fn download_all_missing(&self) -> Result<JobOutcome<DownloadReport>> {
        let requeued = self.repo.requeue_removed().await?;
        tracing::info!(requeued, "re-queued removed entries");
        self.download_pending().await
    }

    /// Flags entries whose files disappeared, then backfills episode images.
    pub async fn check_consistency(&self) -> Result<JobOutcome<ConsistencyReport>> {
        let outcome = self
            .locks
            .run_exclusive(JobName::CheckMissingFiles, || self.sweeps.check_missing_files())
            .await?;

        let JobOutcome::Completed(missing) = outcome else {
            return Ok(JobOutcome::Skipped);
        };
        let images_stored = self.backfill_images().await?.completed().unwrap_or(0);
        Ok(JobOutcome::Completed(ConsistencyReport { missing, images_stored }))
    }

    pub async fn backfill_images(&self) -> Result<JobOutcome<usize>> {
        self.locks
            .run_exclusive(JobName::DownloadEpisodeImages, || self.sweeps.backfill_images())
            .await
    }

    pub async fn backfill_sizes(&self) -> Result<JobOutcome<SizeReport>> {
        self.locks
            .run_exclusive(JobName::UpdateFileSizes, || self.sweeps.backfill_sizes())
            .await
    }

    /// Force-releases locks whose holders overran their duration. Returns the released names.
    pub async fn unlock_stale_jobs(&self) -> Result<JobOutcome<Vec<String>>> {
        self.locks
            .run_exclusive(JobName::UnlockMissedJobs, || self.locks.sweep_stale())
            .await
    }

    pub async fn create_backup(&self) -> Result<JobOutcome<PathBuf>> {
        self.locks
            .run_exclusive(JobName::CreateBackup, || {
                jobs::create_backup(&self.repo, &self.backup_dir, self.backup_keep)
            })
            .await
    }

    // Entries

    pub async fn requeue_entry(&self, id: i64) -> Result<()> {
        if !self.repo.requeue_entry(id).await? {
            return Err(AppError::NotFound(format!("removed entry {id}")));
        }
        Ok(())
    }

    /// Deletes an entry's file and image from disk and keeps it from being queued again.
    pub async fn delete_entry_file(&self, id: i64) -> Result<()> {
        let entry = self
            .repo
            .get_entry(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("entry {id}")))?;

        for path in [entry.local_path.as_deref(), entry.local_image_path.as_deref()]
            .into_iter()
            .flatten()
        {
            remove_file_if_present(Path::new(path)).await?;
        }
        self.repo.set_entry_removed(id, EntryStatus::Deleted).await?;
        tracing::info!(entry_id = id, title = %entry.title, "deleted entry file");
        Ok(())
    }

    pub async fn mark_played(&self, id: i64, played: bool) -> Result<()> {
        if !self.repo.set_entry_played(id, played).await? {
            return Err(AppError::NotFound(format!("entry {id}")));
        }
        Ok(())
    }

    pub async fn set_bookmark(&self, id: i64, at: Option<DateTime<Utc>>) -> Result<()> {
        if !self.repo.set_entry_bookmark(id, at).await? {
            return Err(AppError::NotFound(format!("entry {id}")));
        }
        Ok(())
    }

    // Feeds

    pub async fn set_feed_paused(&self, id: i64, paused: bool) -> Result<()> {
        if !self.repo.set_feed_paused(id, paused).await? {
            return Err(AppError::NotFound(format!("feed {id}")));
        }
        tracing::info!(feed_id = id, paused, "feed pause toggled");
        Ok(())
    }

    /// Unsubscribes a feed. Its entries go with it; their files only when `delete_files` is set.
    pub async fn delete_feed(&self, id: i64, delete_files: bool) -> Result<()> {
        let feed = self
            .repo
            .get_feed(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("feed {id}")))?;

        if delete_files {
            for entry in self.repo.entries_for_feed(id).await? {
                for path in [entry.local_path.as_deref(), entry.local_image_path.as_deref()]
                    .into_iter()
                    .flatten()
                {
                    remove_file_if_present(Path::new(path)).await?;
                }
            }
            if let Some(artwork) = feed.local_artwork_path.as_deref() {
                remove_file_if_present(Path::new(artwork)).await?;
            }
        }

        self.repo.delete_feed(id).await?;
        tracing::info!(feed_id = id, title = %feed.title, delete_files, "deleted feed");
        Ok(())
    }

    // Settings

    pub async fn settings(&self) -> Result<Settings> {
        self.repo.get_settings().await
    }

    pub async fn update_settings(&self, settings: Settings) -> Result<()> {
        self.repo.update_settings(settings).await
    }

    /// Runs every periodic job on its timer until `shutdown` resolves.
    ///
    /// Each tick spawns the jobs as separate tasks; an overlapping tick finds the
    /// previous run's lock held and skips. On shutdown the in-flight jobs are
    /// aborted and this process's locks are released.
    pub async fn run_periodic<S>(self: Arc<Self>, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        // A crash can leave locks behind that no one will ever release.
        log_outcome(JobName::UnlockMissedJobs, self.unlock_stale_jobs().await);

        let mut refresh = tokio::time::interval(self.refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut unlock = tokio::time::interval_at(tokio::time::Instant::now() + UNLOCK_INTERVAL, UNLOCK_INTERVAL);
        unlock.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut backup = tokio::time::interval(BACKUP_INTERVAL);
        backup.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut tasks: JoinSet<()> = JoinSet::new();
        tracing::info!(interval_secs = self.refresh_interval.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = refresh.tick() => {
                    let app = Arc::clone(&self);
                    tasks.spawn(async move {
                        log_outcome(JobName::RefreshEpisodes, app.refresh_all().await);
                    });
                    let app = Arc::clone(&self);
                    tasks.spawn(async move {
                        log_outcome(JobName::CheckMissingFiles, app.check_consistency().await);
                    });
                    let app = Arc::clone(&self);
                    tasks.spawn(async move {
                        log_outcome(JobName::UpdateFileSizes, app.backfill_sizes().await);
                    });
                }
                _ = unlock.tick() => {
                    let app = Arc::clone(&self);
                    tasks.spawn(async move {
                        log_outcome(JobName::UnlockMissedJobs, app.unlock_stale_jobs().await);
                    });
                }
                _ = backup.tick() => {
                    let app = Arc::clone(&self);
                    tasks.spawn(async move {
                        log_outcome(JobName::CreateBackup, app.create_backup().await);
                    });
                }
            }

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!("job task panicked: {}", e);
                }
            }
        }

        tracing::info!(running = tasks.len(), "shutting down");
        tasks.shutdown().await;
        self.locks.release_all().await?;
        Ok(())
    }
}

fn log_outcome<T: Debug>(job: JobName, result: Result<JobOutcome<T>>) {
    match result {
        Ok(JobOutcome::Completed(value)) => tracing::debug!(job = %job, ?value, "job result"),
        Ok(JobOutcome::Skipped) => {}
        Err(e) => tracing::error!(job = %job, "job error: {}", e),
    }
}

async fn remove_file_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
