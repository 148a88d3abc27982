//! The local SQL store (spec.md §4.5), grounded on
//! `syncstorage-sqlite/src/{pool,lib}.rs`: an embedded-migration, r2d2
//! pooled SQLite database, plus one module per table. Every public
//! function here takes a `&mut SqliteConnection` rather than owning the
//! pool, so callers (the collector, sync managers, control API) can
//! choose their own blocking-task boundary via
//! `edge_common::BlockingThreadpool` instead of this crate picking one
//! for them.

pub mod error;
pub mod meters;
pub mod models;
pub mod pool;
pub mod readings;
pub mod registers;
pub mod schema;
pub mod sync_log;
pub mod tenant;

pub use error::{StoreError, StoreResult};
pub use pool::{StorePool, MIGRATIONS};
