//! Keeps a local podcast library in sync with its subscribed feeds.

pub mod app;
pub mod config;
pub mod db;
pub mod download;
pub mod error;
pub mod feed;
pub mod http;
pub mod jobs;
pub mod models;
pub mod sync;

pub use app::App;
pub use config::Config;
pub use error::{AppError, Result};
