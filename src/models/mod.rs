mod entry;
mod feed;
mod job_lock;
mod settings;

pub use entry::{Entry, EntryStatus, NewEntry};
pub use feed::{Feed, NewFeed};
pub use job_lock::{JobLock, JobName};
pub use settings::Settings;
