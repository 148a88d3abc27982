//! Pull-sync and push-sync/upload pipelines (spec.md §4.8, §4.9): moving
//! configuration down from the remote store and readings up to it.

#[macro_use]
extern crate slog_scope;

pub mod pull;
pub mod upload;

pub use pull::{PullSyncError, PullSyncManager, PullSyncReport, SyncCounts};
pub use upload::{UploadInProgress, UploadManager, UploadReport};
