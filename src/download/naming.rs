//! Destination paths for downloaded artifacts.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use url::Url;

use crate::error::{DownloadError, PathValidationError};
use crate::models::Settings;

pub const DEFAULT_MEDIA_EXTENSION: &str = "mp3";
pub const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

// Leaves room for a prefix and extension under the 255 byte NAME_MAX.
const MAX_COMPONENT_BYTES: usize = 200;

/// Everything needed to name one artifact on disk.
#[derive(Debug, Clone)]
pub struct PlacementRequest<'a> {
    pub feed_title: &'a str,
    pub title: &'a str,
    pub remote_url: &'a str,
    /// Used instead of `title` for the file stem when set.
    pub base_name: Option<&'a str>,
    pub prefix: Option<String>,
    pub default_extension: &'a str,
}

/// Makes `name` safe to use as a single path component.
///
/// Separators, reserved characters and control characters become `_`, runs of
/// whitespace and underscores collapse, and leading/trailing dots are dropped so
/// `.` and `..` can never survive.
pub fn sanitize_component(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_gap = false;

    for c in name.chars() {
        let gap = matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
            || c.is_control()
            || c.is_whitespace()
            || c == '_';
        if gap {
            if !prev_gap {
                out.push(if c.is_whitespace() { ' ' } else { '_' });
            }
            prev_gap = true;
        } else {
            out.push(c);
            prev_gap = false;
        }
    }

    let trimmed = out.trim_matches(|c: char| c == ' ' || c == '.' || c == '_');
    truncate(trimmed, MAX_COMPONENT_BYTES)
        .trim_end_matches(|c: char| c == ' ' || c == '.' || c == '_')
        .to_string()
}

fn truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut take = max_bytes;
    while take > 0 && !s.is_char_boundary(take) {
        take -= 1;
    }
    &s[..take]
}

/// Extension of the last path segment of `url`, if it looks like one.
pub fn url_extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;
    let valid = !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}

/// Accepts only absolute http(s) URLs.
pub fn validate_remote_url(url: &str) -> Result<Url, DownloadError> {
    let parsed = Url::parse(url).map_err(|_| DownloadError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        "http" | "https" => Err(DownloadError::InvalidUrl(url.to_string())),
        _ => Err(DownloadError::UnsupportedScheme(url.to_string())),
    }
}

/// `<root>/<feed>/<prefix-><title>.<ext>`, guaranteed to stay under `root`.
pub fn destination(root: &Path, request: &PlacementRequest<'_>) -> Result<PathBuf, PathValidationError> {
    let folder = sanitize_component(request.feed_title);
    if folder.is_empty() {
        return Err(PathValidationError::Empty(request.feed_title.to_string()));
    }

    let raw_stem = request.base_name.unwrap_or(request.title);
    let stem = sanitize_component(raw_stem);
    if stem.is_empty() {
        return Err(PathValidationError::Empty(raw_stem.to_string()));
    }

    let ext = url_extension(request.remote_url)
        .unwrap_or_else(|| request.default_extension.to_string());
    let file_name = match request.prefix.as_deref().map(sanitize_component) {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}-{stem}.{ext}"),
        _ => format!("{stem}.{ext}"),
    };

    let path = root.join(folder).join(file_name);
    ensure_under_root(root, &path)?;
    Ok(path)
}

/// `<stem> (<entry id>).<ext>` beside `path`, for when another entry already owns `path`.
pub fn disambiguate(path: &Path, entry_id: i64) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{stem} ({entry_id}).{}", ext.to_string_lossy()),
        None => format!("{stem} ({entry_id})"),
    };
    path.with_file_name(file_name)
}

/// Rejects any path that is not strictly beneath `root` once taken literally.
pub fn ensure_under_root(root: &Path, path: &Path) -> Result<(), PathValidationError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| PathValidationError::Escapes(path.to_path_buf()))?;

    let mut depth = 0;
    for component in relative.components() {
        match component {
            Component::Normal(_) => depth += 1,
            _ => return Err(PathValidationError::Escapes(path.to_path_buf())),
        }
    }
    if depth == 0 {
        return Err(PathValidationError::Escapes(path.to_path_buf()));
    }
    Ok(())
}

/// Filename prefix per settings: publish date, then episode number.
pub fn file_prefix(settings: &Settings, published_at: DateTime<Utc>, sequence: Option<i64>) -> Option<String> {
    let mut parts = Vec::new();
    if settings.append_date_to_file_name {
        parts.push(published_at.format("%Y-%m-%d").to_string());
    }
    if settings.append_episode_number_to_file_name {
        if let Some(n) = sequence {
            parts.push(format!("{n:03}"));
        }
    }
    (!parts.is_empty()).then(|| parts.join("-"))
}
