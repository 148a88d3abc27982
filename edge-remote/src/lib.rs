//! Remote-facing half of the agent (spec.md §6): a read-only MySQL pool
//! for pull-sync and an HTTP client for push-sync, grounded on
//! `syncstorage-mysql/src/pool.rs`'s pool shape and the teacher's
//! `reqwest`-based API client pattern respectively.

pub mod api_client;
pub mod error;
pub mod pool;
pub mod rows;
mod schema;

pub use api_client::{ApiClient, UploadOutcome};
pub use error::{RemoteError, RemoteResult};
pub use pool::RemoteDbPool;
