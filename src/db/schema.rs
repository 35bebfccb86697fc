pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- feeds table
CREATE TABLE IF NOT EXISTS feeds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    author TEXT,
    artwork_url TEXT,
    local_artwork_path TEXT,
    paused INTEGER NOT NULL DEFAULT 0,
    last_entry_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- entries table
CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    guid TEXT NOT NULL,
    title TEXT NOT NULL,
    summary TEXT NOT NULL DEFAULT '',
    published_at TEXT NOT NULL,
    duration_secs INTEGER NOT NULL DEFAULT 0,
    remote_url TEXT NOT NULL,
    remote_size INTEGER,
    image_url TEXT,
    local_image_path TEXT,
    status TEXT NOT NULL,
    local_path TEXT,
    file_size INTEGER,
    played INTEGER NOT NULL DEFAULT 0,
    bookmark_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(feed_id, guid)
);

CREATE INDEX IF NOT EXISTS idx_entries_feed_id ON entries(feed_id);
CREATE INDEX IF NOT EXISTS idx_entries_status ON entries(status);
CREATE INDEX IF NOT EXISTS idx_entries_published_at ON entries(published_at DESC);

-- settings singleton
CREATE TABLE IF NOT EXISTS settings (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    max_download_concurrency INTEGER NOT NULL DEFAULT 5,
    auto_download INTEGER NOT NULL DEFAULT 1,
    download_on_add INTEGER NOT NULL DEFAULT 1,
    initial_download_count INTEGER NOT NULL DEFAULT 5,
    dont_download_deleted_from_disk INTEGER NOT NULL DEFAULT 0,
    append_date_to_file_name INTEGER NOT NULL DEFAULT 0,
    append_episode_number_to_file_name INTEGER NOT NULL DEFAULT 0,
    download_episode_images INTEGER NOT NULL DEFAULT 0
);

-- job_locks table (locked_at = 0 means free)
CREATE TABLE IF NOT EXISTS job_locks (
    name TEXT PRIMARY KEY,
    locked_at INTEGER NOT NULL DEFAULT 0,
    duration_minutes INTEGER NOT NULL DEFAULT 0
);
"#;
