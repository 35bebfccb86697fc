use std::fmt;

use chrono::{DateTime, Utc};

/// Periodic jobs that must never overlap with themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobName {
    RefreshEpisodes,
    DownloadMissingEpisodes,
    CheckMissingFiles,
    UpdateFileSizes,
    DownloadEpisodeImages,
    CreateBackup,
    UnlockMissedJobs,
}

impl JobName {
    pub fn as_str(self) -> &'static str {
        match self {
            JobName::RefreshEpisodes => "refresh_episodes",
            JobName::DownloadMissingEpisodes => "download_missing_episodes",
            JobName::CheckMissingFiles => "check_missing_files",
            JobName::UpdateFileSizes => "update_file_sizes",
            JobName::DownloadEpisodeImages => "download_episode_images",
            JobName::CreateBackup => "create_backup",
            JobName::UnlockMissedJobs => "unlock_missed_jobs",
        }
    }

    /// How long a holder may keep the lock before the staleness sweep reclaims it.
    pub fn default_duration_minutes(self) -> i64 {
        match self {
            JobName::RefreshEpisodes => 60,
            JobName::DownloadMissingEpisodes => 120,
            JobName::CheckMissingFiles => 30,
            JobName::UpdateFileSizes => 60,
            JobName::DownloadEpisodeImages => 60,
            JobName::CreateBackup => 30,
            JobName::UnlockMissedJobs => 5,
        }
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLock {
    pub name: String,
    /// Unix seconds of acquisition; 0 when free.
    pub locked_at: i64,
    pub duration_minutes: i64,
}

impl JobLock {
    pub fn is_held(&self) -> bool {
        self.locked_at != 0
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.is_held() && now.timestamp() > self.locked_at + self.duration_minutes * 60
    }
}
