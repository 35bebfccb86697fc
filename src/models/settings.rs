use serde::{Deserialize, Serialize};

/// Process-wide download policy, stored as a single database row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub max_download_concurrency: i64,
    pub auto_download: bool,
    /// Whether the first sync of a newly added feed queues anything at all.
    pub download_on_add: bool,
    pub initial_download_count: i64,
    /// Files missing from disk become `Deleted` instead of `Removed`.
    pub dont_download_deleted_from_disk: bool,
    pub append_date_to_file_name: bool,
    pub append_episode_number_to_file_name: bool,
    pub download_episode_images: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_download_concurrency: 5,
            auto_download: true,
            download_on_add: true,
            initial_download_count: 5,
            dont_download_deleted_from_disk: false,
            append_date_to_file_name: false,
            append_episode_number_to_file_name: false,
            download_episode_images: false,
        }
    }
}

impl Settings {
    pub fn worker_count(&self) -> usize {
        self.max_download_concurrency.max(1) as usize
    }
}
