//! Cleanup Agent (spec.md §4.7): periodic retention enforcement over the
//! local store. Grounded directly on `edge_store::readings::
//! delete_old_synchronized` and `edge_store::sync_log::purge`, which
//! already implement the bounded-batch deletes; this module is the thin
//! orchestration wrapper the scheduler drives on a timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use edge_common::BlockingThreadpool;
use edge_store::StorePool;

/// Outcome of one cleanup pass, surfaced on `/status`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CleanupReport {
    pub readings_deleted: usize,
    pub log_rows_purged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupInProgress;

pub struct CleanupAgent {
    store: StorePool,
    blocking: Arc<BlockingThreadpool>,
    reading_retention_days: u32,
    log_retention_days: u32,
    running: AtomicBool,
}

impl CleanupAgent {
    pub fn new(
        store: StorePool,
        blocking: Arc<BlockingThreadpool>,
        reading_retention_days: u32,
        log_retention_days: u32,
    ) -> Self {
        Self {
            store,
            blocking,
            reading_retention_days,
            log_retention_days,
            running: AtomicBool::new(false),
        }
    }

    /// Deletes synchronized readings older than `reading_retention_days`
    /// and purges `sync_log` rows older than `log_retention_days`.
    /// Unsynchronized readings are never touched regardless of age
    /// (spec.md §5's backpressure guarantee).
    pub async fn run_cycle(&self) -> Result<CleanupReport, CleanupInProgress> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CleanupInProgress);
        }

        let store = self.store.clone();
        let reading_cutoff = Utc::now() - Duration::days(self.reading_retention_days as i64);
        let log_cutoff = Utc::now() - Duration::days(self.log_retention_days as i64);
        let report = self
            .blocking
            .spawn(move || -> Result<CleanupReport, edge_store::StoreError> {
                let mut conn = store.get()?;
                let readings_deleted = edge_store::readings::delete_old_synchronized(&mut conn, reading_cutoff)?;
                let log_rows_purged = edge_store::sync_log::purge(&mut conn, log_cutoff)?;
                Ok(CleanupReport {
                    readings_deleted,
                    log_rows_purged,
                })
            })
            .await
            .unwrap_or_default();

        self.running.store(false, Ordering::Release);
        Ok(report)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use edge_common::model::{Quality, Reading};
    use edge_common::Id;

    fn store_with_one_old_synchronized_reading() -> StorePool {
        let store = StorePool::new(":memory:", 1).unwrap();
        let mut conn = store.get().unwrap();
        let reading = Reading {
            id: Id::new("r1"),
            meter_id: Id::new("m1"),
            timestamp: Utc::now() - Duration::days(120),
            field_name: "energy_kwh".into(),
            value: 1.0,
            unit: "kWh".into(),
            quality: Quality::Good,
            synchronized: true,
            retry_count: 0,
            quarantined: false,
        };
        edge_store::readings::insert(&mut conn, &reading).unwrap();
        store
    }

    fn agent(store: StorePool) -> CleanupAgent {
        CleanupAgent::new(store, Arc::new(BlockingThreadpool::default()), 60, 30)
    }

    #[tokio::test]
    async fn deletes_synchronized_readings_past_retention() {
        let store = store_with_one_old_synchronized_reading();
        let report = agent(store).run_cycle().await.unwrap();
        assert_eq!(report.readings_deleted, 1);
    }

    #[tokio::test]
    async fn a_second_concurrent_cycle_is_rejected() {
        let store = StorePool::new(":memory:", 1).unwrap();
        let cleanup = agent(store);
        cleanup.running.store(true, Ordering::Release);
        assert_eq!(cleanup.run_cycle().await, Err(CleanupInProgress));
    }
}
