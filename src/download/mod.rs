pub mod naming;
mod placement;
mod scheduler;

pub use naming::PlacementRequest;
pub use placement::{FilePlacement, PlacedFile};
pub use scheduler::{DownloadHandle, DownloadReport, DownloadScheduler};
