mod reconciler;
mod refresh;

pub use reconciler::{assign_status, ReconcileOutcome, Reconciler, StatusPolicy, SyncKind};
pub use refresh::{RefreshReport, RefreshService};
