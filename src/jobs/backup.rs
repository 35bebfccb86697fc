use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::db::Repository;
use crate::error::Result;

const BACKUP_PREFIX: &str = "castkeeper-";
const BACKUP_SUFFIX: &str = ".db";

/// Snapshots the database into `dir` and prunes all but the newest `keep` snapshots.
pub async fn create_backup(repo: &Repository, dir: &Path, keep: usize) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    let name = format!(
        "{BACKUP_PREFIX}{}{BACKUP_SUFFIX}",
        Utc::now().format("%Y%m%dT%H%M%S%.3f")
    );
    let path = dir.join(name);
    repo.backup_into(&path).await?;
    tracing::info!(path = %path.display(), "database backup written");

    prune(dir, keep.max(1)).await?;
    Ok(path)
}

async fn prune(dir: &Path, keep: usize) -> Result<()> {
    let mut backups = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(item) = read_dir.next_entry().await? {
        let name = item.file_name().to_string_lossy().to_string();
        if name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_SUFFIX) {
            backups.push(item.path());
        }
    }

    // Names embed the timestamp, so lexical order is age order.
    backups.sort();
    let excess = backups.len().saturating_sub(keep);
    for old in backups.into_iter().take(excess) {
        match tokio::fs::remove_file(&old).await {
            Ok(()) => tracing::debug!(path = %old.display(), "pruned old backup"),
            Err(e) => tracing::warn!(path = %old.display(), "failed to prune backup: {}", e),
        }
    }
    Ok(())
}
