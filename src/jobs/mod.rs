mod backup;
mod consistency;
mod lock;

pub use backup::create_backup;
pub use consistency::{ConsistencySweeps, MissingFilesReport, SizeReport, SIZE_UNKNOWN};
pub use lock::{JobLockManager, JobOutcome};
