//! A small wrapper around `tokio::task::spawn_blocking`, ported from the
//! teacher's `syncserver_common::BlockingThreadpool`. The local store
//! (`edge-store`) is a blocking diesel/r2d2 API; every call it makes must
//! go through this so the async scheduler never blocks its reactor on
//! disk I/O, and so active-blocking-task counts are observable.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::InternalError;

/// Intentionally does not implement `Clone`: instantiate once, share as
/// `Arc<BlockingThreadpool>`, exactly as the teacher's comment specifies.
#[derive(Debug, Default)]
pub struct BlockingThreadpool {
    spawned_tasks: AtomicU64,
}

impl BlockingThreadpool {
    pub async fn spawn<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: fmt::Debug + Send + InternalError + 'static,
    {
        self.spawned_tasks.fetch_add(1, Ordering::Relaxed);
        let result = tokio::task::spawn_blocking(f)
            .await
            .unwrap_or_else(|_| Err(E::internal_error("blocking task was cancelled".to_owned())));
        self.spawned_tasks.fetch_sub(1, Ordering::Relaxed);
        result
    }

    pub fn active_tasks(&self) -> u64 {
        self.spawned_tasks.load(Ordering::Relaxed)
    }
}
