//! Idempotent repair passes that bring stored entry metadata back in line with
//! the file system and the network.

use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::db::Repository;
use crate::download::FilePlacement;
use crate::error::Result;
use crate::models::{Entry, EntryStatus};

/// Stored when neither the disk nor the server could tell us a size.
pub const SIZE_UNKNOWN: i64 = -1;

const SIZE_PROBE_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeReport {
    pub updated: usize,
    /// Entries that got the `SIZE_UNKNOWN` sentinel.
    pub unknown: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingFilesReport {
    pub checked: usize,
    pub removed: usize,
}

pub struct ConsistencySweeps {
    repo: Arc<Repository>,
    placement: Arc<FilePlacement>,
}

impl ConsistencySweeps {
    pub fn new(repo: Arc<Repository>, placement: Arc<FilePlacement>) -> Self {
        Self { repo, placement }
    }

    /// Fills in file sizes for entries that have none: from disk when materialized,
    /// otherwise from a HEAD request or the size the feed declared.
    pub async fn backfill_sizes(&self) -> Result<SizeReport> {
        let entries = self.repo.entries_missing_size().await?;
        if entries.is_empty() {
            return Ok(SizeReport::default());
        }
        tracing::info!(entries = entries.len(), "backfilling file sizes");

        let sizes: Vec<(i64, i64)> = stream::iter(entries)
            .map(|entry| async move {
                let size = self.resolve_size(&entry).await;
                (entry.id, size)
            })
            .buffer_unordered(SIZE_PROBE_CONCURRENCY)
            .collect()
            .await;

        let mut report = SizeReport::default();
        for (id, size) in sizes {
            self.repo.set_entry_file_size(id, size).await?;
            if size == SIZE_UNKNOWN {
                report.unknown += 1;
            } else {
                report.updated += 1;
            }
        }
        Ok(report)
    }

    async fn resolve_size(&self, entry: &Entry) -> i64 {
        if entry.status == EntryStatus::Materialized {
            if let Some(path) = entry.local_path.as_deref() {
                match tokio::fs::metadata(path).await {
                    Ok(meta) => return meta.len() as i64,
                    Err(e) => tracing::debug!(entry_id = entry.id, path, "cannot stat local file: {}", e),
                }
            }
        }

        match self.placement.probe_size(&entry.remote_url).await {
            Ok(Some(size)) if size > 0 => size as i64,
            Ok(_) => entry.remote_size.filter(|s| *s > 0).unwrap_or(SIZE_UNKNOWN),
            Err(e) => {
                tracing::debug!(entry_id = entry.id, url = %entry.remote_url, "size probe failed: {}", e);
                entry.remote_size.filter(|s| *s > 0).unwrap_or(SIZE_UNKNOWN)
            }
        }
    }

    /// Marks materialized entries whose file vanished from disk as removed.
    ///
    /// With `dont_download_deleted_from_disk` they become `Deleted` and are never
    /// queued again automatically; otherwise `Removed`.
    pub async fn check_missing_files(&self) -> Result<MissingFilesReport> {
        let settings = self.repo.get_settings().await?;
        let target = if settings.dont_download_deleted_from_disk {
            EntryStatus::Deleted
        } else {
            EntryStatus::Removed
        };

        let entries = self.repo.entries_with_status(EntryStatus::Materialized).await?;
        let mut report = MissingFilesReport {
            checked: entries.len(),
            ..MissingFilesReport::default()
        };

        for entry in entries {
            let present = match entry.local_path.as_deref() {
                Some(path) => match tokio::fs::try_exists(Path::new(path)).await {
                    Ok(present) => present,
                    Err(e) => {
                        tracing::warn!(entry_id = entry.id, path, "cannot check file, leaving entry as is: {}", e);
                        continue;
                    }
                },
                None => false,
            };
            if !present {
                tracing::info!(
                    entry_id = entry.id,
                    title = %entry.title,
                    status = %target,
                    "file missing from disk"
                );
                self.repo.set_entry_removed(entry.id, target).await?;
                report.removed += 1;
            }
        }
        Ok(report)
    }

    /// Best-effort download of artwork for materialized entries that lack a local copy.
    pub async fn backfill_images(&self) -> Result<usize> {
        let settings = self.repo.get_settings().await?;
        if !settings.download_episode_images {
            return Ok(0);
        }

        let mut stored = 0;
        for entry in self.repo.materialized_without_image().await? {
            let (Some(image_url), Some(media_path)) = (entry.image_url.as_deref(), entry.local_path.as_deref()) else {
                continue;
            };
            match self.placement.place_entry_image(image_url, Path::new(media_path)).await {
                Ok(placed) => {
                    self.repo
                        .set_entry_image_path(entry.id, placed.path.to_string_lossy().to_string())
                        .await?;
                    stored += 1;
                }
                Err(e) => tracing::warn!(entry_id = entry.id, url = image_url, "image download failed: {}", e),
            }
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewEntry, NewFeed, Settings};
    use chrono::Utc;
    use reqwest::Client;

    async fn setup() -> (ConsistencySweeps, Arc<Repository>, i64, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(Repository::in_memory().await.unwrap());
        let feed_id = repo
            .insert_feed(NewFeed {
                url: "https://example.com/feed".into(),
                title: "Show".into(),
                author: None,
                artwork_url: None,
            })
            .await
            .unwrap();
        let placement = Arc::new(FilePlacement::new(dir.path(), Client::new()));
        (ConsistencySweeps::new(Arc::clone(&repo), placement), repo, feed_id, dir)
    }

    fn entry(feed_id: i64, guid: &str, url: &str, remote_size: Option<i64>) -> NewEntry {
        NewEntry {
            feed_id,
            guid: guid.into(),
            title: guid.into(),
            summary: String::new(),
            published_at: Utc::now(),
            duration_secs: 0,
            remote_url: url.into(),
            remote_size,
            image_url: None,
            status: EntryStatus::Pending,
        }
    }

    async fn materialize(repo: &Repository, dir: &Path, guid: &str, bytes: &[u8]) -> (i64, std::path::PathBuf) {
        let entry = repo
            .entries_with_status(EntryStatus::Pending)
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.guid == guid)
            .unwrap();
        let path = dir.join(format!("{guid}.mp3"));
        std::fs::write(&path, bytes).unwrap();
        repo.set_entry_materialized(entry.id, path.to_string_lossy().to_string(), bytes.len() as i64)
            .await
            .unwrap();
        (entry.id, path)
    }

    #[tokio::test]
    async fn missing_file_becomes_removed() {
        let (sweeps, repo, feed_id, dir) = setup().await;
        repo.insert_entries(vec![
            entry(feed_id, "kept", "https://x.example/a.mp3", None),
            entry(feed_id, "gone", "https://x.example/b.mp3", None),
        ])
        .await
        .unwrap();
        materialize(&repo, dir.path(), "kept", b"1").await;
        let (gone_id, gone_path) = materialize(&repo, dir.path(), "gone", b"2").await;
        std::fs::remove_file(gone_path).unwrap();

        let report = sweeps.check_missing_files().await.unwrap();
        assert_eq!(report, MissingFilesReport { checked: 2, removed: 1 });

        let gone = repo.get_entry(gone_id).await.unwrap().unwrap();
        assert_eq!(gone.status, EntryStatus::Removed);
        assert_eq!(gone.local_path, None);

        // Second pass has nothing left to do.
        let again = sweeps.check_missing_files().await.unwrap();
        assert_eq!(again, MissingFilesReport { checked: 1, removed: 0 });
    }

    #[tokio::test]
    async fn missing_file_becomes_deleted_when_configured() {
        let (sweeps, repo, feed_id, dir) = setup().await;
        repo.update_settings(Settings {
            dont_download_deleted_from_disk: true,
            ..Settings::default()
        })
        .await
        .unwrap();
        repo.insert_entries(vec![entry(feed_id, "gone", "https://x.example/b.mp3", None)])
            .await
            .unwrap();
        let (id, path) = materialize(&repo, dir.path(), "gone", b"2").await;
        std::fs::remove_file(path).unwrap();

        sweeps.check_missing_files().await.unwrap();
        let gone = repo.get_entry(id).await.unwrap().unwrap();
        assert_eq!(gone.status, EntryStatus::Deleted);
        assert_eq!(repo.requeue_removed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sizes_come_from_disk_or_fall_back() {
        let (sweeps, repo, feed_id, dir) = setup().await;
        repo.insert_entries(vec![
            entry(feed_id, "local", "https://x.example/a.mp3", None),
            // Nothing listens on port 9, so these probes fail.
            entry(feed_id, "declared", "http://127.0.0.1:9/b.mp3", Some(4096)),
            entry(feed_id, "unknown", "http://127.0.0.1:9/c.mp3", None),
        ])
        .await
        .unwrap();
        let (local_id, _) = materialize(&repo, dir.path(), "local", b"hello").await;
        repo.clear_entry_file_size(local_id).await.unwrap();

        let report = sweeps.backfill_sizes().await.unwrap();
        assert_eq!(report, SizeReport { updated: 2, unknown: 1 });

        let entries = repo.entries_for_feed(feed_id).await.unwrap();
        let size_of = |guid: &str| entries.iter().find(|e| e.guid == guid).unwrap().file_size;
        assert_eq!(size_of("local"), Some(5));
        assert_eq!(size_of("declared"), Some(4096));
        assert_eq!(size_of("unknown"), Some(SIZE_UNKNOWN));
        assert_eq!(repo.get_entry(local_id).await.unwrap().unwrap().file_size, Some(5));

        // Sentinel values are not probed again.
        assert_eq!(sweeps.backfill_sizes().await.unwrap(), SizeReport::default());
    }

    #[tokio::test]
    async fn zero_byte_files_are_not_probed_again() {
        let (sweeps, repo, feed_id, dir) = setup().await;
        repo.insert_entries(vec![entry(feed_id, "empty", "http://127.0.0.1:9/e.mp3", None)])
            .await
            .unwrap();
        let (id, _) = materialize(&repo, dir.path(), "empty", b"").await;

        assert_eq!(sweeps.backfill_sizes().await.unwrap(), SizeReport::default());
        assert_eq!(repo.get_entry(id).await.unwrap().unwrap().file_size, Some(0));
    }

    #[tokio::test]
    async fn unreadable_paths_are_left_alone() {
        let (sweeps, repo, feed_id, dir) = setup().await;
        repo.insert_entries(vec![entry(feed_id, "odd", "https://x.example/o.mp3", None)])
            .await
            .unwrap();
        let (id, blocker) = materialize(&repo, dir.path(), "odd", b"1").await;
        // A path below a regular file cannot be stat'ed: ENOTDIR, not "not found".
        let unreadable = blocker.join("odd.mp3").to_string_lossy().to_string();
        repo.set_entry_materialized(id, unreadable.clone(), 1)
            .await
            .unwrap();

        let report = sweeps.check_missing_files().await.unwrap();
        assert_eq!(report, MissingFilesReport { checked: 1, removed: 0 });

        let odd = repo.get_entry(id).await.unwrap().unwrap();
        assert_eq!(odd.status, EntryStatus::Materialized);
        assert_eq!(odd.local_path, Some(unreadable));
    }

    #[tokio::test]
    async fn image_backfill_is_off_by_default() {
        let (sweeps, _repo, _feed_id, _dir) = setup().await;
        assert_eq!(sweeps.backfill_images().await.unwrap(), 0);
    }
}
