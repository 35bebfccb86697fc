use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub artwork_url: Option<String>,
    pub local_artwork_path: Option<String>,
    pub paused: bool,
    /// Newest publish date seen across this feed's entries.
    pub last_entry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFeed {
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub artwork_url: Option<String>,
}
