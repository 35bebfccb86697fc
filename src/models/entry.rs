use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Materialization state of an entry's artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Queued for the next download sweep.
    Pending,
    /// Transferring right now. Only ever observed in memory.
    InProgress,
    /// The artifact is on disk at `local_path`.
    Materialized,
    /// Not on disk, but may be queued again.
    Removed,
    /// Not on disk and excluded from re-queueing.
    Deleted,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::InProgress => "in_progress",
            EntryStatus::Materialized => "materialized",
            EntryStatus::Removed => "removed",
            EntryStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntryStatus::Pending),
            "in_progress" => Ok(EntryStatus::InProgress),
            "materialized" => Ok(EntryStatus::Materialized),
            "removed" => Ok(EntryStatus::Removed),
            "deleted" => Ok(EntryStatus::Deleted),
            other => Err(format!("unknown entry status {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub feed_id: i64,
    pub feed_title: String,
    pub guid: String,
    pub title: String,
    pub summary: String,
    pub published_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub remote_url: String,
    pub remote_size: Option<i64>,
    pub image_url: Option<String>,
    pub local_image_path: Option<String>,
    pub status: EntryStatus,
    pub local_path: Option<String>,
    /// Bytes on disk, or the feed/HEAD size before download. `-1` once probing failed.
    pub file_size: Option<i64>,
    pub played: bool,
    pub bookmark_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewEntry {
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub summary: String,
    pub published_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub remote_url: String,
    pub remote_size: Option<i64>,
    pub image_url: Option<String>,
    pub status: EntryStatus,
}
