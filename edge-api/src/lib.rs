//! The loopback Control API (spec.md §4.11): a small `actix-web`
//! surface for operators and sidecar tooling to inspect pipeline status
//! and trigger cycles on demand, grounded on the teacher's
//! `syncserver::server` module.

#[macro_use]
extern crate slog_scope;

mod error;
mod handlers;
mod server;
mod state;

pub use error::ApiError;
pub use server::run;
pub use state::AppState;
