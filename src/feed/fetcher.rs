use chrono::{DateTime, Utc};
use feed_rs::model::{Entry as FeedEntry, Feed as FeedDocument, Link, Text};
use feed_rs::parser;
use reqwest::Client;

use crate::error::FetchError;

use super::extras::{self, FeedExtras};
use super::timestamp::{parse_duration, parse_timestamp};

// html2text wraps at this width; wide enough that summaries stay one paragraph per line.
const SUMMARY_WRAP_WIDTH: usize = 10_000;

/// Channel-level metadata used to create or update a Feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub title: String,
    pub author: Option<String>,
    pub artwork_url: Option<String>,
}

/// One feed item, normalized for reconciliation.
#[derive(Debug, Clone)]
pub struct ParsedItem {
    pub guid: String,
    pub title: String,
    pub summary: String,
    /// Zero timestamp when the feed gave no parseable date.
    pub published_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub enclosure_url: Option<String>,
    pub enclosure_size: Option<i64>,
    pub image_url: Option<String>,
}

/// A fetched feed: the parsed document plus the raw bytes it came from.
pub struct FetchedFeed {
    pub url: String,
    pub raw: Vec<u8>,
    pub document: FeedDocument,
    extras: FeedExtras,
}

impl FetchedFeed {
    pub fn parse(url: impl Into<String>, raw: Vec<u8>) -> Result<Self, FetchError> {
        let document = parse_document(&raw)?;
        let extras = extras::scan(&raw);
        Ok(Self {
            url: url.into(),
            raw,
            document,
            extras,
        })
    }

    pub fn channel(&self) -> ChannelInfo {
        let doc = &self.document;
        ChannelInfo {
            title: doc
                .title
                .as_ref()
                .map(|t| t.content.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled Feed".to_string()),
            author: doc.authors.first().map(|a| a.name.clone()),
            artwork_url: self
                .extras
                .channel_image
                .clone()
                .or_else(|| doc.logo.as_ref().map(|i| i.uri.clone()))
                .or_else(|| doc.icon.as_ref().map(|i| i.uri.clone())),
        }
    }

    /// Items in document order.
    pub fn items(&self) -> Vec<ParsedItem> {
        self.document
            .entries
            .iter()
            .map(|entry| self.item_from_entry(entry))
            .collect()
    }

    fn item_from_entry(&self, entry: &FeedEntry) -> ParsedItem {
        let enclosure = entry
            .media
            .iter()
            .flat_map(|m| m.content.iter())
            .find(|c| c.url.is_some());
        let enclosure_url = enclosure.and_then(|c| c.url.as_ref()).map(|u| u.to_string());
        let enclosure_size = enclosure
            .and_then(|c| c.size)
            .and_then(|s| i64::try_from(s).ok());

        let guid = if entry.id.trim().is_empty() {
            enclosure_url.clone().unwrap_or_default()
        } else {
            entry.id.trim().to_string()
        };

        let extra = self.extras.item(&guid, enclosure_url.as_deref());

        // Prefer the podcast summary, fall back to the description, then full content
        let summary_html = entry
            .media
            .iter()
            .find_map(|m| m.description.as_ref().map(|d| d.content.as_str()))
            .filter(|s| !s.trim().is_empty())
            .or_else(|| {
                entry
                    .summary
                    .as_ref()
                    .map(|s| s.content.as_str())
                    .filter(|s| !s.trim().is_empty())
            })
            .or_else(|| entry.content.as_ref().and_then(|c| c.body.as_deref()));

        let summary = summary_html
            .and_then(|html| html2text::from_read(html.as_bytes(), SUMMARY_WRAP_WIDTH).ok())
            .map(|text| text.trim().to_string())
            .unwrap_or_default();

        let duration_secs = extra
            .and_then(|e| e.duration.as_deref())
            .map(parse_duration)
            .filter(|d| *d > 0)
            .or_else(|| {
                entry
                    .media
                    .iter()
                    .find_map(|m| m.duration.or_else(|| m.content.iter().find_map(|c| c.duration)))
                    .map(|d| d.as_secs() as i64)
            })
            .unwrap_or(0);

        let image_url = extra.and_then(|e| e.image_url.clone()).or_else(|| {
            entry
                .media
                .iter()
                .flat_map(|m| m.thumbnails.iter())
                .map(|t| t.image.uri.clone())
                .next()
        });

        ParsedItem {
            guid,
            title: entry
                .title
                .as_ref()
                .map(|t| t.content.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string()),
            summary,
            published_at: entry
                .published
                .or(entry.updated)
                .unwrap_or(DateTime::UNIX_EPOCH),
            duration_secs,
            enclosure_url,
            enclosure_size,
            image_url,
        }
    }
}

/// Parses a feed document, routing every date through the lenient timestamp ladder.
pub fn parse_document(raw: &[u8]) -> Result<FeedDocument, FetchError> {
    let parser = parser::Builder::new()
        .timestamp_parser(parse_timestamp)
        .id_generator(stable_id)
        .build();
    Ok(parser.parse(raw)?)
}

// Items with neither a guid nor a link keep an empty id so the enclosure URL
// can stand in for it. feed-rs would otherwise hand out a fresh UUID per parse.
fn stable_id(links: &[Link], title: &Option<Text>, _uri: Option<&str>) -> String {
    if links.is_empty() {
        return String::new();
    }
    parser::generate_id(links, title, None)
}

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedFeed, FetchError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let bytes = response.bytes().await?;
        let fetched = FetchedFeed::parse(url, bytes.to_vec())?;

        tracing::debug!(
            url,
            entries = fetched.document.entries.len(),
            "fetched feed"
        );

        Ok(fetched)
    }
}
