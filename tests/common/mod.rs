#![allow(dead_code)]

pub mod feed_server;

use chrono::{TimeZone, Utc};

/// One `<item>` of a generated RSS document.
pub struct Item {
    pub guid: String,
    pub title: String,
    pub day: u32,
    pub enclosure: String,
    pub image: Option<String>,
}

impl Item {
    /// Episode `n`, published on day `n` of January 2024, with its media at `<base>media/<n>.mp3`.
    pub fn episode(base: &str, n: u32) -> Self {
        Self {
            guid: format!("episode-{n}"),
            title: format!("Episode {n}"),
            day: n,
            enclosure: format!("{base}media/{n}.mp3"),
            image: None,
        }
    }
}

/// Renders an RSS 2.0 document with the iTunes namespace, items in the given order.
pub fn rss(title: &str, artwork: Option<&str>, items: &[Item]) -> String {
    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    out.push_str(r#"<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd"><channel>"#);
    out.push_str(&format!("<title>{title}</title><link>https://example.com/</link><description>test feed</description>"));
    if let Some(artwork) = artwork {
        out.push_str(&format!(r#"<itunes:image href="{artwork}"/>"#));
    }
    for item in items {
        let published = Utc
            .with_ymd_and_hms(2024, 1, item.day.clamp(1, 28), 8, 0, 0)
            .unwrap()
            .to_rfc2822();
        let image = item
            .image
            .as_deref()
            .map(|href| format!(r#"<itunes:image href="{href}"/>"#))
            .unwrap_or_default();
        out.push_str(&format!(
            r#"<item><guid>{}</guid><title>{}</title><pubDate>{}</pubDate><itunes:duration>12:34</itunes:duration>{}<enclosure url="{}" length="3" type="audio/mpeg"/></item>"#,
            item.guid, item.title, published, image, item.enclosure
        ));
    }
    out.push_str("</channel></rss>");
    out
}
