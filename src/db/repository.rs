use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{Entry, EntryStatus, Feed, JobLock, NewEntry, NewFeed, Settings};

use super::schema::SCHEMA;

// Keeps each IN (...) list well under SQLite's bound-parameter limit.
const GUID_LOOKUP_CHUNK: usize = 500;

const FEED_COLUMNS: &str = "id, url, title, author, artwork_url, local_artwork_path, paused, \
     last_entry_at, created_at, updated_at";

const ENTRY_SELECT: &str = r#"SELECT e.id, e.feed_id, f.title, e.guid, e.title, e.summary,
              e.published_at, e.duration_secs, e.remote_url, e.remote_size, e.image_url,
              e.local_image_path, e.status, e.local_path, e.file_size, e.played, e.bookmark_at
       FROM entries e
       JOIN feeds f ON e.feed_id = f.id"#;

/// Handle to the SQLite store. Cheap to share behind an `Arc`; every call is row-scoped.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Feed operations

    pub async fn insert_feed(&self, feed: NewFeed) -> Result<i64> {
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO feeds (url, title, author, artwork_url) VALUES (?1, ?2, ?3, ?4)",
                    params![feed.url, feed.title, feed.author, feed.artwork_url],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn get_feed(&self, id: i64) -> Result<Option<Feed>> {
        let feed = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1");
                let feed = conn
                    .query_row(&sql, params![id], feed_from_row)
                    .optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let url = url.to_string();
        let feed = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?1");
                let feed = conn
                    .query_row(&sql, params![url], feed_from_row)
                    .optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    pub async fn get_all_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(|conn| {
                let sql = format!("SELECT {FEED_COLUMNS} FROM feeds ORDER BY title");
                let mut stmt = conn.prepare(&sql)?;
                let feeds = stmt
                    .query_map([], feed_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(feeds)
    }

    pub async fn update_feed_metadata(
        &self,
        id: i64,
        title: String,
        author: Option<String>,
        artwork_url: Option<String>,
    ) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"UPDATE feeds SET title = ?2, author = ?3, artwork_url = COALESCE(?4, artwork_url),
                              updated_at = datetime('now')
                       WHERE id = ?1"#,
                    params![id, title, author, artwork_url],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_feed_paused(&self, id: i64, paused: bool) -> Result<bool> {
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE feeds SET paused = ?2, updated_at = datetime('now') WHERE id = ?1",
                    params![id, paused],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(changed)
    }

    pub async fn set_feed_artwork_path(&self, id: i64, path: String) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE feeds SET local_artwork_path = ?2 WHERE id = ?1",
                    params![id, path],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Moves the latest-entry timestamp forward to `at`. Never moves it back.
    pub async fn advance_feed_last_entry(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let at = format_datetime(at);
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    r#"UPDATE feeds SET last_entry_at = ?2, updated_at = datetime('now')
                       WHERE id = ?1 AND (last_entry_at IS NULL OR last_entry_at < ?2)"#,
                    params![id, at],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(changed)
    }

    pub async fn delete_feed(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .call(move |conn| {
                let n = conn.execute("DELETE FROM feeds WHERE id = ?1", params![id])?;
                Ok(n > 0)
            })
            .await?;
        Ok(deleted)
    }

    // Entry operations

    /// Returns which of `guids` are already stored for `feed_id`.
    pub async fn existing_guids(&self, feed_id: i64, guids: Vec<String>) -> Result<HashSet<String>> {
        if guids.is_empty() {
            return Ok(HashSet::new());
        }

        let found = self
            .conn
            .call(move |conn| {
                let mut found = HashSet::new();
                for chunk in guids.chunks(GUID_LOOKUP_CHUNK) {
                    let placeholders = vec!["?"; chunk.len()].join(", ");
                    let sql = format!(
                        "SELECT guid FROM entries WHERE feed_id = ? AND guid IN ({placeholders})"
                    );
                    let mut values = Vec::with_capacity(chunk.len() + 1);
                    values.push(Value::Integer(feed_id));
                    values.extend(chunk.iter().map(|g| Value::Text(g.clone())));

                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                        row.get::<_, String>(0)
                    })?;
                    for guid in rows {
                        found.insert(guid?);
                    }
                }
                Ok(found)
            })
            .await?;
        Ok(found)
    }

    /// Inserts all entries in one transaction. Rows whose (feed, guid) already exists are skipped.
    pub async fn insert_entries(&self, entries: Vec<NewEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0;
                {
                    let mut stmt = tx.prepare(
                        r#"INSERT OR IGNORE INTO entries
                               (feed_id, guid, title, summary, published_at, duration_secs,
                                remote_url, remote_size, image_url, status)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
                    )?;
                    for entry in &entries {
                        inserted += stmt.execute(params![
                            entry.feed_id,
                            entry.guid,
                            entry.title,
                            entry.summary,
                            format_datetime(entry.published_at),
                            entry.duration_secs,
                            entry.remote_url,
                            entry.remote_size,
                            entry.image_url,
                            entry.status.as_str(),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        Ok(inserted)
    }

    pub async fn get_entry(&self, id: i64) -> Result<Option<Entry>> {
        let entry = self
            .conn
            .call(move |conn| {
                let sql = format!("{ENTRY_SELECT} WHERE e.id = ?1");
                let entry = conn
                    .query_row(&sql, params![id], entry_from_row)
                    .optional()?;
                Ok(entry)
            })
            .await?;
        Ok(entry)
    }

    pub async fn entries_for_feed(&self, feed_id: i64) -> Result<Vec<Entry>> {
        self.query_entries(
            "WHERE e.feed_id = ?1 ORDER BY e.published_at DESC, e.id",
            vec![Value::Integer(feed_id)],
        )
        .await
    }

    pub async fn entries_with_status(&self, status: EntryStatus) -> Result<Vec<Entry>> {
        self.query_entries(
            "WHERE e.status = ?1 ORDER BY e.published_at DESC, e.id",
            vec![Value::Text(status.as_str().to_string())],
        )
        .await
    }

    pub async fn entries_missing_size(&self) -> Result<Vec<Entry>> {
        self.query_entries(
            "WHERE e.file_size IS NULL ORDER BY e.id",
            Vec::new(),
        )
        .await
    }

    pub async fn materialized_without_image(&self) -> Result<Vec<Entry>> {
        self.query_entries(
            r#"WHERE e.status = 'materialized' AND e.image_url IS NOT NULL
                 AND e.local_image_path IS NULL ORDER BY e.id"#,
            Vec::new(),
        )
        .await
    }

    async fn query_entries(&self, clause: &'static str, values: Vec<Value>) -> Result<Vec<Entry>> {
        let entries = self
            .conn
            .call(move |conn| {
                let sql = format!("{ENTRY_SELECT} {clause}");
                let mut stmt = conn.prepare(&sql)?;
                let entries = stmt
                    .query_map(params_from_iter(values.iter()), entry_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await?;
        Ok(entries)
    }

    /// 1-based position of an entry within its feed, ordered by publish date.
    pub async fn entry_sequence_number(&self, feed_id: i64, published_at: DateTime<Utc>) -> Result<i64> {
        let published_at = format_datetime(published_at);
        let n = self
            .conn
            .call(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM entries WHERE feed_id = ?1 AND published_at <= ?2",
                    params![feed_id, published_at],
                    |row| row.get(0),
                )?;
                Ok(n)
            })
            .await?;
        Ok(n.max(1))
    }

    pub async fn count_entries(&self, feed_id: i64) -> Result<i64> {
        let n = self
            .conn
            .call(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM entries WHERE feed_id = ?1",
                    params![feed_id],
                    |row| row.get(0),
                )?;
                Ok(n)
            })
            .await?;
        Ok(n)
    }

    /// Whether an entry other than `id` has `path` recorded as its local file.
    pub async fn path_claimed_by_other(&self, path: String, id: i64) -> Result<bool> {
        let claimed = self
            .conn
            .call(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM entries WHERE local_path = ?1 AND id != ?2",
                    params![path, id],
                    |row| row.get(0),
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(claimed)
    }

    pub async fn set_entry_materialized(&self, id: i64, path: String, size: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE entries SET status = 'materialized', local_path = ?2, file_size = ?3 WHERE id = ?1",
                    params![id, path, size],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Marks an entry as absent from disk, forgetting its local path.
    pub async fn set_entry_removed(&self, id: i64, status: EntryStatus) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE entries SET status = ?2, local_path = NULL WHERE id = ?1",
                    params![id, status.as_str()],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Re-queues every soft-removed entry. Hard-deleted entries are left alone.
    pub async fn requeue_removed(&self) -> Result<usize> {
        let n = self
            .conn
            .call(|conn| {
                let n = conn.execute(
                    "UPDATE entries SET status = 'pending' WHERE status = 'removed'",
                    [],
                )?;
                Ok(n)
            })
            .await?;
        Ok(n)
    }

    pub async fn requeue_entry(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE entries SET status = 'pending' WHERE id = ?1 AND status IN ('removed', 'deleted')",
                    params![id],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(changed)
    }

    pub async fn set_entry_file_size(&self, id: i64, size: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE entries SET file_size = ?2 WHERE id = ?1",
                    params![id, size],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn clear_entry_file_size(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute("UPDATE entries SET file_size = NULL WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_entry_image_path(&self, id: i64, path: String) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE entries SET local_image_path = ?2 WHERE id = ?1",
                    params![id, path],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_entry_played(&self, id: i64, played: bool) -> Result<bool> {
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE entries SET played = ?2 WHERE id = ?1",
                    params![id, played],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(changed)
    }

    pub async fn set_entry_bookmark(&self, id: i64, at: Option<DateTime<Utc>>) -> Result<bool> {
        let at = at.map(format_datetime);
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE entries SET bookmark_at = ?2 WHERE id = ?1",
                    params![id, at],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(changed)
    }

    // Settings

    /// Reads the settings row, creating it with defaults on first access.
    pub async fn get_settings(&self) -> Result<Settings> {
        let settings = self
            .conn
            .call(|conn| {
                conn.execute("INSERT OR IGNORE INTO settings (id) VALUES (1)", [])?;
                let settings = conn.query_row(
                    r#"SELECT max_download_concurrency, auto_download, download_on_add,
                              initial_download_count, dont_download_deleted_from_disk,
                              append_date_to_file_name, append_episode_number_to_file_name,
                              download_episode_images
                       FROM settings WHERE id = 1"#,
                    [],
                    |row| {
                        Ok(Settings {
                            max_download_concurrency: row.get(0)?,
                            auto_download: row.get(1)?,
                            download_on_add: row.get(2)?,
                            initial_download_count: row.get(3)?,
                            dont_download_deleted_from_disk: row.get(4)?,
                            append_date_to_file_name: row.get(5)?,
                            append_episode_number_to_file_name: row.get(6)?,
                            download_episode_images: row.get(7)?,
                        })
                    },
                )?;
                Ok(settings)
            })
            .await?;
        Ok(settings)
    }

    pub async fn update_settings(&self, settings: Settings) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO settings (id, max_download_concurrency, auto_download, download_on_add,
                                             initial_download_count, dont_download_deleted_from_disk,
                                             append_date_to_file_name, append_episode_number_to_file_name,
                                             download_episode_images)
                       VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                       ON CONFLICT(id) DO UPDATE SET
                           max_download_concurrency = excluded.max_download_concurrency,
                           auto_download = excluded.auto_download,
                           download_on_add = excluded.download_on_add,
                           initial_download_count = excluded.initial_download_count,
                           dont_download_deleted_from_disk = excluded.dont_download_deleted_from_disk,
                           append_date_to_file_name = excluded.append_date_to_file_name,
                           append_episode_number_to_file_name = excluded.append_episode_number_to_file_name,
                           download_episode_images = excluded.download_episode_images"#,
                    params![
                        settings.max_download_concurrency,
                        settings.auto_download,
                        settings.download_on_add,
                        settings.initial_download_count,
                        settings.dont_download_deleted_from_disk,
                        settings.append_date_to_file_name,
                        settings.append_episode_number_to_file_name,
                        settings.download_episode_images,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Job locks

    pub async fn get_lock(&self, name: &str) -> Result<Option<JobLock>> {
        let name = name.to_string();
        let lock = self
            .conn
            .call(move |conn| {
                let lock = conn
                    .query_row(
                        "SELECT name, locked_at, duration_minutes FROM job_locks WHERE name = ?1",
                        params![name],
                        lock_from_row,
                    )
                    .optional()?;
                Ok(lock)
            })
            .await?;
        Ok(lock)
    }

    pub async fn get_all_locks(&self) -> Result<Vec<JobLock>> {
        let locks = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT name, locked_at, duration_minutes FROM job_locks ORDER BY name")?;
                let locks = stmt
                    .query_map([], lock_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(locks)
            })
            .await?;
        Ok(locks)
    }

    /// Unconditionally records `name` as held from `locked_at` for `duration_minutes`.
    pub async fn write_lock(&self, name: &str, locked_at: i64, duration_minutes: i64) -> Result<()> {
        let name = name.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO job_locks (name, locked_at, duration_minutes) VALUES (?1, ?2, ?3)
                       ON CONFLICT(name) DO UPDATE SET
                           locked_at = excluded.locked_at,
                           duration_minutes = excluded.duration_minutes"#,
                    params![name, locked_at, duration_minutes],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn clear_lock(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE job_locks SET locked_at = 0, duration_minutes = 0 WHERE name = ?1",
                    params![name],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Maintenance

    /// Writes a consistent copy of the whole database to `path`.
    pub async fn backup_into(&self, path: &Path) -> Result<()> {
        let path = path.to_string_lossy().to_string();
        self.conn
            .call(move |conn| {
                conn.execute("VACUUM INTO ?1", params![path])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56Z")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn optional_datetime(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s)))
}

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        author: row.get(3)?,
        artwork_url: row.get(4)?,
        local_artwork_path: row.get(5)?,
        paused: row.get(6)?,
        last_entry_at: optional_datetime(row, 7)?,
        created_at: optional_datetime(row, 8)?.unwrap_or_else(Utc::now),
        updated_at: optional_datetime(row, 9)?.unwrap_or_else(Utc::now),
    })
}

fn entry_from_row(row: &Row) -> rusqlite::Result<Entry> {
    let status: String = row.get(12)?;
    let status = status
        .parse::<EntryStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(12, Type::Text, e.into()))?;

    Ok(Entry {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        feed_title: row.get(2)?,
        guid: row.get(3)?,
        title: row.get(4)?,
        summary: row.get(5)?,
        published_at: optional_datetime(row, 6)?.unwrap_or(DateTime::UNIX_EPOCH),
        duration_secs: row.get(7)?,
        remote_url: row.get(8)?,
        remote_size: row.get(9)?,
        image_url: row.get(10)?,
        local_image_path: row.get(11)?,
        status,
        local_path: row.get(13)?,
        file_size: row.get(14)?,
        played: row.get(15)?,
        bookmark_at: optional_datetime(row, 16)?,
    })
}

fn lock_from_row(row: &Row) -> rusqlite::Result<JobLock> {
    Ok(JobLock {
        name: row.get(0)?,
        locked_at: row.get(1)?,
        duration_minutes: row.get(2)?,
    })
}
