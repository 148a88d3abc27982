//! Shared application state handed to every Control API handler,
//! grounded on the teacher's `syncserver::server::ServerState` — one
//! struct bundling whatever a handler needs, injected via `web::Data`
//! rather than a global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use edge_cache::CacheLayer;
use edge_common::BlockingThreadpool;
use edge_scheduler::Scheduler;
use edge_store::StorePool;

pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub store: StorePool,
    pub cache: Arc<CacheLayer>,
    pub blocking: Arc<BlockingThreadpool>,
    /// Flipped by the agent's shutdown sequence before `control_api.stop()`
    /// so `/__lbheartbeat__` can report unhealthy during drain, the way the
    /// teacher's `deadman` flag does for `syncserver`.
    pub shutting_down: Arc<AtomicBool>,
}

impl AppState {
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}
