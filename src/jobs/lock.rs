//! Named advisory locks that keep each periodic job from overlapping with itself.
//!
//! A lock row is held while its timestamp is non-zero. Acquisition is a plain
//! read-then-write against the store, which is only sound because a single
//! process owns the database; the in-process mutex below closes the gap between
//! the check and the write for tasks inside that process.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::db::Repository;
use crate::error::Result;
use crate::models::JobName;

/// Result of asking for a lock-guarded job to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome<T> {
    Completed(T),
    /// Another run of the same job holds the lock. Nothing was done.
    Skipped,
}

impl<T> JobOutcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, JobOutcome::Skipped)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            JobOutcome::Completed(value) => Some(value),
            JobOutcome::Skipped => None,
        }
    }
}

pub struct JobLockManager {
    repo: Arc<Repository>,
    gate: Mutex<()>,
}

impl JobLockManager {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self {
            repo,
            gate: Mutex::new(()),
        }
    }

    /// Unconditionally marks `name` as held from now. Check `is_locked` first.
    pub async fn acquire(&self, name: JobName, duration_minutes: i64) -> Result<()> {
        self.repo
            .write_lock(name.as_str(), Utc::now().timestamp(), duration_minutes)
            .await
    }

    pub async fn is_locked(&self, name: JobName) -> Result<bool> {
        Ok(self
            .repo
            .get_lock(name.as_str())
            .await?
            .is_some_and(|lock| lock.is_held()))
    }

    pub async fn release(&self, name: JobName) -> Result<()> {
        self.repo.clear_lock(name.as_str()).await
    }

    /// Clears every lock. Only for shutdown, after this process stopped its own jobs.
    pub async fn release_all(&self) -> Result<()> {
        for lock in self.repo.get_all_locks().await? {
            if lock.is_held() {
                self.repo.clear_lock(&lock.name).await?;
            }
        }
        Ok(())
    }

    pub async fn sweep_stale(&self) -> Result<Vec<String>> {
        self.sweep_stale_at(Utc::now()).await
    }

    /// Force-releases every lock whose holder overran its declared duration as of `now`.
    pub async fn sweep_stale_at(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let _gate = self.gate.lock().await;
        let mut released = Vec::new();
        for lock in self.repo.get_all_locks().await? {
            if lock.is_stale(now) {
                tracing::warn!(
                    job = %lock.name,
                    locked_at = lock.locked_at,
                    duration_minutes = lock.duration_minutes,
                    "releasing stale job lock"
                );
                self.repo.clear_lock(&lock.name).await?;
                released.push(lock.name);
            }
        }
        Ok(released)
    }

    /// Runs `job` unless another run of `name` currently holds the lock.
    ///
    /// The lock is released when `job` finishes, whether it succeeded or not.
    pub async fn run_exclusive<T, F, Fut>(&self, name: JobName, job: F) -> Result<JobOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        {
            let _gate = self.gate.lock().await;
            if self.is_locked(name).await? {
                tracing::info!(job = %name, "job already running, skipping");
                return Ok(JobOutcome::Skipped);
            }
            self.acquire(name, name.default_duration_minutes()).await?;
        }

        tracing::info!(job = %name, "job started");
        let result = job().await;

        if let Err(e) = self.release(name).await {
            tracing::error!(job = %name, "failed to release job lock: {}", e);
        }

        match result {
            Ok(value) => {
                tracing::info!(job = %name, "job finished");
                Ok(JobOutcome::Completed(value))
            }
            Err(e) => {
                tracing::error!(job = %name, "job failed: {}", e);
                Err(e)
            }
        }
    }
}
