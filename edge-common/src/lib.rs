#[macro_use]
extern crate slog_scope;

pub mod error;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod threadpool;

pub use error::{EdgeError, EdgeResult, ErrorKind, InternalError, ReportableError};
pub use logging::{init_logging, reset_logging};
pub use metrics::{statsd_client, Metrics, MetricTimer};
pub use threadpool::BlockingThreadpool;

/// An opaque stable identifier (spec.md §3: "Identifier type is 'opaque
/// stable id'"). A newtype over `String` so ids for different entities
/// can't be accidentally swapped at a call site, while leaving remote
/// sources free to hand us either integers or UUIDs as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Self(value)
    }
}
