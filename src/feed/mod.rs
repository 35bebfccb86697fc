mod extras;
mod fetcher;
pub mod timestamp;

pub use fetcher::{parse_document, ChannelInfo, FeedFetcher, FetchedFeed, ParsedItem};
