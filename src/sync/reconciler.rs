use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::db::Repository;
use crate::error::Result;
use crate::feed::ParsedItem;
use crate::models::{EntryStatus, Feed, NewEntry, Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// The feed was just added and has never been reconciled.
    FirstSync,
    Refresh,
}

/// Inputs that decide whether a newly discovered entry gets queued.
#[derive(Debug, Clone)]
pub struct StatusPolicy {
    pub paused: bool,
    pub auto_download: bool,
    pub download_on_add: bool,
    pub initial_download_count: i64,
    pub kind: SyncKind,
}

impl StatusPolicy {
    pub fn new(feed: &Feed, settings: &Settings, kind: SyncKind) -> Self {
        Self {
            paused: feed.paused,
            auto_download: settings.auto_download,
            download_on_add: settings.download_on_add,
            initial_download_count: settings.initial_download_count,
            kind,
        }
    }
}

/// Status for the `index`-th new entry of a document, counted in document order.
pub fn assign_status(policy: &StatusPolicy, index: usize) -> EntryStatus {
    if policy.paused {
        return EntryStatus::Removed;
    }
    if policy.kind == SyncKind::FirstSync && !policy.download_on_add {
        return EntryStatus::Removed;
    }
    if !policy.auto_download {
        return EntryStatus::Removed;
    }
    match policy.kind {
        SyncKind::Refresh => EntryStatus::Pending,
        SyncKind::FirstSync if (index as i64) < policy.initial_download_count => EntryStatus::Pending,
        SyncKind::FirstSync => EntryStatus::Removed,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub new_entries: usize,
    /// New entries that were queued for download.
    pub pending: usize,
    /// Items dropped as duplicates or for lacking an enclosure.
    pub skipped: usize,
    /// Newest publish date among the processed items, if any carried one.
    pub latest: Option<DateTime<Utc>>,
}

/// Turns freshly parsed items into stored entries, exactly once per GUID.
pub struct Reconciler {
    repo: Arc<Repository>,
}

impl Reconciler {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    pub async fn reconcile(&self, feed: &Feed, items: &[ParsedItem], kind: SyncKind) -> Result<ReconcileOutcome> {
        let settings = self.repo.get_settings().await?;
        let policy = StatusPolicy::new(feed, &settings, kind);

        let guids: Vec<String> = items.iter().map(|i| i.guid.clone()).collect();
        let mut seen = self.repo.existing_guids(feed.id, guids).await?;

        let mut outcome = ReconcileOutcome::default();
        let mut new_entries = Vec::new();

        for item in items {
            let Some(remote_url) = item.enclosure_url.clone() else {
                tracing::debug!(feed_id = feed.id, guid = %item.guid, "item has no enclosure, skipping");
                outcome.skipped += 1;
                continue;
            };
            if item.guid.is_empty() || !seen.insert(item.guid.clone()) {
                outcome.skipped += 1;
                continue;
            }

            if item.published_at > DateTime::UNIX_EPOCH {
                outcome.latest = outcome.latest.max(Some(item.published_at));
            }

            let status = assign_status(&policy, new_entries.len());
            if status == EntryStatus::Pending {
                outcome.pending += 1;
            }
            new_entries.push(NewEntry {
                feed_id: feed.id,
                guid: item.guid.clone(),
                title: item.title.clone(),
                summary: item.summary.clone(),
                published_at: item.published_at,
                duration_secs: item.duration_secs,
                remote_url,
                remote_size: item.enclosure_size,
                image_url: item.image_url.clone(),
                status,
            });
        }

        if new_entries.is_empty() {
            tracing::debug!(feed_id = feed.id, skipped = outcome.skipped, "no new entries");
            return Ok(outcome);
        }

        outcome.new_entries = self.repo.insert_entries(new_entries).await?;

        if let Some(latest) = outcome.latest {
            self.repo.advance_feed_last_entry(feed.id, latest).await?;
        }

        tracing::info!(
            feed = %feed.title,
            new_entries = outcome.new_entries,
            pending = outcome.pending,
            "reconciled feed"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FetchedFeed;
    use crate::models::NewFeed;
    use chrono::{Duration, TimeZone};

    fn item(n: usize) -> ParsedItem {
        ParsedItem {
            guid: format!("guid-{n}"),
            title: format!("Episode {n}"),
            summary: String::new(),
            published_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n as i64),
            duration_secs: 60,
            enclosure_url: Some(format!("https://cdn.example.com/{n}.mp3")),
            enclosure_size: Some(1000),
            image_url: None,
        }
    }

    async fn setup(settings: Settings, paused: bool) -> (Reconciler, Arc<Repository>, Feed) {
        let repo = Arc::new(Repository::in_memory().await.unwrap());
        repo.update_settings(settings).await.unwrap();
        let id = repo
            .insert_feed(NewFeed {
                url: "https://example.com/feed".into(),
                title: "Show".into(),
                author: None,
                artwork_url: None,
            })
            .await
            .unwrap();
        if paused {
            repo.set_feed_paused(id, true).await.unwrap();
        }
        let feed = repo.get_feed(id).await.unwrap().unwrap();
        (Reconciler::new(Arc::clone(&repo)), repo, feed)
    }

    fn policy(kind: SyncKind) -> StatusPolicy {
        StatusPolicy {
            paused: false,
            auto_download: true,
            download_on_add: true,
            initial_download_count: 2,
            kind,
        }
    }

    #[test]
    fn first_sync_queues_only_the_initial_count() {
        let p = policy(SyncKind::FirstSync);
        let statuses: Vec<_> = (0..4).map(|i| assign_status(&p, i)).collect();
        assert_eq!(
            statuses,
            vec![EntryStatus::Pending, EntryStatus::Pending, EntryStatus::Removed, EntryStatus::Removed]
        );
    }

    #[test]
    fn refresh_ignores_the_initial_count() {
        let p = policy(SyncKind::Refresh);
        assert_eq!(assign_status(&p, 50), EntryStatus::Pending);
    }

    #[test]
    fn paused_and_disabled_feeds_never_queue() {
        let paused = StatusPolicy {
            paused: true,
            ..policy(SyncKind::Refresh)
        };
        assert_eq!(assign_status(&paused, 0), EntryStatus::Removed);

        let no_auto = StatusPolicy {
            auto_download: false,
            ..policy(SyncKind::Refresh)
        };
        assert_eq!(assign_status(&no_auto, 0), EntryStatus::Removed);

        let no_add = StatusPolicy {
            download_on_add: false,
            ..policy(SyncKind::FirstSync)
        };
        assert_eq!(assign_status(&no_add, 0), EntryStatus::Removed);
        // download_on_add only concerns the first sync
        let refresh_no_add = StatusPolicy {
            download_on_add: false,
            ..policy(SyncKind::Refresh)
        };
        assert_eq!(assign_status(&refresh_no_add, 0), EntryStatus::Pending);
    }

    #[tokio::test]
    async fn first_sync_of_ten_with_initial_three() {
        let (reconciler, repo, feed) = setup(
            Settings {
                initial_download_count: 3,
                ..Settings::default()
            },
            false,
        )
        .await;
        let items: Vec<_> = (0..10).map(item).collect();

        let outcome = reconciler.reconcile(&feed, &items, SyncKind::FirstSync).await.unwrap();
        assert_eq!(outcome.new_entries, 10);
        assert_eq!(outcome.pending, 3);

        let pending = repo.entries_with_status(EntryStatus::Pending).await.unwrap();
        let removed = repo.entries_with_status(EntryStatus::Removed).await.unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(removed.len(), 7);
        let mut queued: Vec<_> = pending.iter().map(|e| e.guid.as_str()).collect();
        queued.sort();
        assert_eq!(queued, vec!["guid-0", "guid-1", "guid-2"]);
    }

    #[tokio::test]
    async fn reconciling_twice_inserts_nothing_new() {
        let (reconciler, repo, feed) = setup(Settings::default(), false).await;
        let items: Vec<_> = (0..4).map(item).collect();

        reconciler.reconcile(&feed, &items, SyncKind::FirstSync).await.unwrap();
        let again = reconciler.reconcile(&feed, &items, SyncKind::Refresh).await.unwrap();

        assert_eq!(again.new_entries, 0);
        assert_eq!(again.skipped, 4);
        assert_eq!(repo.count_entries(feed.id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn refresh_queues_every_new_entry() {
        let (reconciler, repo, feed) = setup(
            Settings {
                initial_download_count: 0,
                ..Settings::default()
            },
            false,
        )
        .await;
        let mut items: Vec<_> = (0..3).map(item).collect();
        reconciler.reconcile(&feed, &items, SyncKind::FirstSync).await.unwrap();
        assert!(repo.entries_with_status(EntryStatus::Pending).await.unwrap().is_empty());

        items.extend((3..5).map(item));
        let outcome = reconciler.reconcile(&feed, &items, SyncKind::Refresh).await.unwrap();
        assert_eq!(outcome.new_entries, 2);
        assert_eq!(repo.entries_with_status(EntryStatus::Pending).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn paused_feed_stores_entries_as_removed() {
        let (reconciler, repo, feed) = setup(Settings::default(), true).await;
        let items: Vec<_> = (0..3).map(item).collect();

        let outcome = reconciler.reconcile(&feed, &items, SyncKind::Refresh).await.unwrap();
        assert_eq!(outcome.pending, 0);
        assert_eq!(repo.entries_with_status(EntryStatus::Removed).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn duplicates_and_bare_items_are_skipped() {
        let (reconciler, repo, feed) = setup(Settings::default(), false).await;
        let mut bare = item(7);
        bare.enclosure_url = None;
        let items = vec![item(1), item(1), bare, item(2)];

        let outcome = reconciler.reconcile(&feed, &items, SyncKind::Refresh).await.unwrap();
        assert_eq!(outcome.new_entries, 2);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(repo.count_entries(feed.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn guidless_items_are_stored_once_across_refreshes() {
        let (reconciler, repo, feed) = setup(Settings::default(), false).await;
        let doc = br#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Show</title>
  <item><title>Ep</title><enclosure url="https://cdn.example.com/1.mp3" type="audio/mpeg"/></item>
</channel></rss>"#;

        for _ in 0..3 {
            let fetched = FetchedFeed::parse("https://example.com/feed", doc.to_vec()).unwrap();
            reconciler.reconcile(&feed, &fetched.items(), SyncKind::Refresh).await.unwrap();
        }
        assert_eq!(repo.count_entries(feed.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn latest_entry_timestamp_only_moves_forward() {
        let (reconciler, repo, feed) = setup(Settings::default(), false).await;
        reconciler.reconcile(&feed, &[item(5)], SyncKind::Refresh).await.unwrap();
        let after_first = repo.get_feed(feed.id).await.unwrap().unwrap().last_entry_at;
        assert_eq!(after_first, Some(item(5).published_at));

        // An older, newly seen item must not move it back.
        reconciler.reconcile(&feed, &[item(1)], SyncKind::Refresh).await.unwrap();
        let after_second = repo.get_feed(feed.id).await.unwrap().unwrap().last_entry_at;
        assert_eq!(after_second, after_first);
    }
}
