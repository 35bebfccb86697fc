//! Second pass over the raw feed bytes for namespaced elements the main
//! parser flattens or drops (`itunes:image`, raw `itunes:duration`).

use std::collections::HashMap;

use regex::Regex;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemExtras {
    pub image_url: Option<String>,
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FeedExtras {
    pub channel_image: Option<String>,
    by_guid: HashMap<String, ItemExtras>,
    by_enclosure: HashMap<String, ItemExtras>,
}

impl FeedExtras {
    /// Looks an item up by its GUID, falling back to its enclosure URL.
    pub fn item(&self, guid: &str, enclosure_url: Option<&str>) -> Option<&ItemExtras> {
        self.by_guid
            .get(guid)
            .or_else(|| enclosure_url.and_then(|url| self.by_enclosure.get(url)))
    }
}

struct Patterns {
    item: Regex,
    guid: Regex,
    enclosure: Regex,
    image: Regex,
    duration: Regex,
}

impl Patterns {
    fn new() -> Option<Self> {
        Some(Self {
            item: Regex::new(r"(?s)<item\b.*?</item>").ok()?,
            guid: Regex::new(r"(?s)<guid\b[^>]*>(.*?)</guid>").ok()?,
            enclosure: Regex::new(r#"<enclosure\b[^>]*\burl=["']([^"']+)["']"#).ok()?,
            image: Regex::new(r#"<itunes:image\b[^>]*\bhref=["']([^"']+)["']"#).ok()?,
            duration: Regex::new(r"(?s)<itunes:duration>(.*?)</itunes:duration>").ok()?,
        })
    }
}

pub fn scan(raw: &[u8]) -> FeedExtras {
    let Some(patterns) = Patterns::new() else {
        return FeedExtras::default();
    };
    let text = String::from_utf8_lossy(raw);

    // Channel-level elements are the ones before the first item.
    let channel_end = text.find("<item").unwrap_or(text.len());
    let channel_image = capture(&patterns.image, &text[..channel_end]);

    let mut extras = FeedExtras {
        channel_image,
        ..FeedExtras::default()
    };

    for item in patterns.item.find_iter(&text) {
        let block = item.as_str();
        let found = ItemExtras {
            image_url: capture(&patterns.image, block),
            duration: capture(&patterns.duration, block),
        };
        if found == ItemExtras::default() {
            continue;
        }

        if let Some(guid) = capture(&patterns.guid, block) {
            extras.by_guid.insert(guid, found.clone());
        }
        if let Some(url) = capture(&patterns.enclosure, block) {
            extras.by_enclosure.insert(url, found);
        }
    }

    extras
}

fn capture(re: &Regex, haystack: &str) -> Option<String> {
    re.captures(haystack)
        .and_then(|cap| cap.get(1))
        .map(|m| unescape(m.as_str().trim()))
        .filter(|s| !s.is_empty())
}

fn unescape(value: &str) -> String {
    let value = value
        .strip_prefix("<![CDATA[")
        .and_then(|v| v.strip_suffix("]]>"))
        .unwrap_or(value);
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}
