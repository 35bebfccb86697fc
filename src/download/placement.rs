use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Response};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::db::Repository;
use crate::error::{self, DownloadError, PathValidationError};
use crate::models::{Entry, EntryStatus, Settings};

use super::naming::{self, PlacementRequest, DEFAULT_IMAGE_EXTENSION, DEFAULT_MEDIA_EXTENSION};

// Distinguishes partial files of concurrent transfers to the same destination.
static PARTIAL_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedFile {
    pub path: PathBuf,
    pub size: u64,
    /// False when an existing file at the destination was adopted instead.
    pub transferred: bool,
}

/// Writes remote artifacts beneath a single storage root.
pub struct FilePlacement {
    root: PathBuf,
    client: Client,
    /// Destinations reserved by transfers in flight, keyed to the owning entry.
    claims: Mutex<HashMap<PathBuf, i64>>,
}

impl FilePlacement {
    pub fn new(root: impl Into<PathBuf>, client: Client) -> Self {
        Self {
            root: root.into(),
            client,
            claims: Mutex::new(HashMap::new()),
        }
    }

    pub fn destination(&self, request: &PlacementRequest<'_>) -> Result<PathBuf, PathValidationError> {
        naming::destination(&self.root, request)
    }

    /// Downloads `url` to `dest` unless a file is already there.
    ///
    /// Bytes land in a sibling `.part` file that is renamed into place only once
    /// the body has been fully written, so `dest` never holds a truncated file.
    pub async fn place(&self, url: &str, dest: &Path) -> Result<PlacedFile, DownloadError> {
        let url = naming::validate_remote_url(url)?;
        naming::ensure_under_root(&self.root, dest)?;

        if let Ok(meta) = fs::metadata(dest).await {
            if meta.is_file() {
                tracing::debug!(path = %dest.display(), "already on disk, skipping transfer");
                return Ok(PlacedFile {
                    path: dest.to_path_buf(),
                    size: meta.len(),
                    transferred: false,
                });
            }
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status()));
        }

        let partial = partial_path(dest);
        match write_body(response, &partial).await {
            Ok(size) => {
                if let Err(e) = fs::rename(&partial, dest).await {
                    let _ = fs::remove_file(&partial).await;
                    return Err(e.into());
                }
                tracing::debug!(path = %dest.display(), bytes = size, "placed file");
                Ok(PlacedFile {
                    path: dest.to_path_buf(),
                    size,
                    transferred: true,
                })
            }
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                Err(e)
            }
        }
    }

    /// Downloads an entry's artifact and records it as materialized.
    ///
    /// The status is only written after the file is fully in place. On any error
    /// the entry keeps whatever status it had.
    pub async fn materialize(&self, repo: &Repository, entry: &Entry, settings: &Settings) -> error::Result<PlacedFile> {
        let sequence = if settings.append_episode_number_to_file_name {
            Some(repo.entry_sequence_number(entry.feed_id, entry.published_at).await?)
        } else {
            None
        };

        let request = PlacementRequest {
            feed_title: &entry.feed_title,
            title: &entry.title,
            remote_url: &entry.remote_url,
            base_name: None,
            prefix: naming::file_prefix(settings, entry.published_at, sequence),
            default_extension: DEFAULT_MEDIA_EXTENSION,
        };
        let dest = self.claim(repo, entry.id, self.destination(&request)?).await?;

        let result = self.transfer_entry(repo, entry, &dest).await;
        self.claims.lock().await.remove(&dest);
        result
    }

    /// Reserves a destination for `entry_id`. The planned path is kept unless
    /// another entry owns it, on disk or in flight; then the entry id is
    /// appended to the name. A file nobody owns is left to be adopted.
    async fn claim(&self, repo: &Repository, entry_id: i64, planned: PathBuf) -> error::Result<PathBuf> {
        let mut claims = self.claims.lock().await;
        let candidates = [planned.clone(), naming::disambiguate(&planned, entry_id)];

        for candidate in candidates {
            if claims.get(&candidate).is_some_and(|owner| *owner != entry_id) {
                continue;
            }
            if repo
                .path_claimed_by_other(candidate.to_string_lossy().to_string(), entry_id)
                .await?
            {
                continue;
            }
            if candidate != planned {
                tracing::debug!(entry_id, path = %candidate.display(), "name taken, using entry-specific name");
            }
            claims.insert(candidate.clone(), entry_id);
            return Ok(candidate);
        }
        Err(PathValidationError::Taken(planned).into())
    }

    async fn transfer_entry(&self, repo: &Repository, entry: &Entry, dest: &Path) -> error::Result<PlacedFile> {
        tracing::debug!(
            entry_id = entry.id,
            status = %EntryStatus::InProgress,
            path = %dest.display(),
            "downloading entry"
        );
        let placed = self.place(&entry.remote_url, dest).await?;

        repo.set_entry_materialized(
            entry.id,
            placed.path.to_string_lossy().to_string(),
            placed.size as i64,
        )
        .await?;

        Ok(placed)
    }

    /// Stores an entry's artwork next to its media file, sharing the media file's stem.
    pub async fn place_entry_image(&self, image_url: &str, media_path: &Path) -> Result<PlacedFile, DownloadError> {
        let ext = naming::url_extension(image_url).unwrap_or_else(|| DEFAULT_IMAGE_EXTENSION.to_string());
        let dest = media_path.with_extension(ext);
        self.place(image_url, &dest).await
    }

    /// Stores a feed's cover as `folder.<ext>` inside the feed's directory.
    pub async fn place_feed_artwork(&self, feed_title: &str, url: &str) -> Result<PlacedFile, DownloadError> {
        let request = PlacementRequest {
            feed_title,
            title: "folder",
            remote_url: url,
            base_name: None,
            prefix: None,
            default_extension: DEFAULT_IMAGE_EXTENSION,
        };
        let dest = self.destination(&request)?;
        self.place(url, &dest).await
    }

    /// Content length reported by a HEAD request, if the server sends one.
    pub async fn probe_size(&self, url: &str) -> Result<Option<u64>, DownloadError> {
        let url = naming::validate_remote_url(url)?;
        let response = self.client.head(url).send().await?;
        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status()));
        }

        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok()))
    }
}

async fn write_body(mut response: Response, path: &Path) -> Result<u64, DownloadError> {
    let mut file = fs::File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

fn partial_path(dest: &Path) -> PathBuf {
    let n = PARTIAL_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.{}.{n}.part", std::process::id()))
}
