use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::db::Repository;
use crate::download::FilePlacement;
use crate::error::{AppError, Result};
use crate::feed::{FeedFetcher, FetchedFeed};
use crate::models::{Feed, NewFeed};

use super::reconciler::{ReconcileOutcome, Reconciler, SyncKind};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub feeds: usize,
    /// Feeds whose fetch or reconciliation failed this round.
    pub failed: usize,
    pub new_entries: usize,
    pub queued: usize,
}

/// Drives fetch and reconciliation for subscribed feeds.
pub struct RefreshService {
    repo: Arc<Repository>,
    fetcher: FeedFetcher,
    reconciler: Reconciler,
    placement: Arc<FilePlacement>,
    fetch_concurrency: usize,
}

impl RefreshService {
    pub fn new(
        repo: Arc<Repository>,
        fetcher: FeedFetcher,
        placement: Arc<FilePlacement>,
        fetch_concurrency: usize,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(Arc::clone(&repo)),
            repo,
            fetcher,
            placement,
            fetch_concurrency: fetch_concurrency.max(1),
        }
    }

    /// Subscribes to `url`. The feed row is only created once the document
    /// fetched and parsed; a URL that is already subscribed is returned as is.
    pub async fn add_feed(&self, url: &str) -> Result<Feed> {
        let url = url.trim();
        if let Some(existing) = self.repo.get_feed_by_url(url).await? {
            tracing::info!(url, feed_id = existing.id, "feed already subscribed");
            return Ok(existing);
        }

        let fetched = self.fetcher.fetch(url).await?;
        let channel = fetched.channel();
        let id = self
            .repo
            .insert_feed(NewFeed {
                url: url.to_string(),
                title: channel.title,
                author: channel.author,
                artwork_url: channel.artwork_url,
            })
            .await?;
        let feed = self
            .repo
            .get_feed(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("feed {id}")))?;
        tracing::info!(feed_id = id, title = %feed.title, "added feed");

        self.reconciler
            .reconcile(&feed, &fetched.items(), SyncKind::FirstSync)
            .await?;
        self.store_artwork(&feed).await;

        // Re-read so the caller sees the latest-entry timestamp and artwork path.
        Ok(self.repo.get_feed(id).await?.unwrap_or(feed))
    }

    /// Fetches every feed with bounded parallelism and reconciles each one as its
    /// document arrives. A failing feed is logged and does not stop the rest.
    pub async fn refresh_all(&self) -> Result<RefreshReport> {
        let feeds = self.repo.get_all_feeds().await?;
        let mut report = RefreshReport {
            feeds: feeds.len(),
            ..RefreshReport::default()
        };
        if feeds.is_empty() {
            return Ok(report);
        }

        let mut fetches = stream::iter(feeds)
            .map(|feed| async move {
                let result = self.fetcher.fetch(&feed.url).await;
                (feed, result)
            })
            .buffer_unordered(self.fetch_concurrency);

        while let Some((feed, fetched)) = fetches.next().await {
            let fetched = match fetched {
                Ok(fetched) => fetched,
                Err(e) => {
                    tracing::warn!(feed_id = feed.id, url = %feed.url, "failed to fetch feed: {}", e);
                    report.failed += 1;
                    continue;
                }
            };

            match self.apply(&feed, &fetched).await {
                Ok(outcome) => {
                    report.new_entries += outcome.new_entries;
                    report.queued += outcome.pending;
                }
                Err(e) => {
                    tracing::warn!(feed_id = feed.id, url = %feed.url, "failed to update feed: {}", e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            feeds = report.feeds,
            failed = report.failed,
            new_entries = report.new_entries,
            queued = report.queued,
            "refresh finished"
        );
        Ok(report)
    }

    async fn apply(&self, feed: &Feed, fetched: &FetchedFeed) -> Result<ReconcileOutcome> {
        let channel = fetched.channel();
        self.repo
            .update_feed_metadata(feed.id, channel.title, channel.author, channel.artwork_url)
            .await?;
        self.reconciler
            .reconcile(feed, &fetched.items(), SyncKind::Refresh)
            .await
    }

    async fn store_artwork(&self, feed: &Feed) {
        let Some(url) = feed.artwork_url.as_deref() else {
            return;
        };
        match self.placement.place_feed_artwork(&feed.title, url).await {
            Ok(placed) => {
                if let Err(e) = self
                    .repo
                    .set_feed_artwork_path(feed.id, placed.path.to_string_lossy().to_string())
                    .await
                {
                    tracing::warn!(feed_id = feed.id, "failed to record artwork path: {}", e);
                }
            }
            Err(e) => tracing::warn!(feed_id = feed.id, url, "artwork download failed: {}", e),
        }
    }
}
