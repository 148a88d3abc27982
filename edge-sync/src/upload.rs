//! Push-Sync / Upload Manager (spec.md §4.9): batches unsynchronized
//! local readings to the remote readings API. Reuses `edge_breaker`'s
//! retry+circuit-breaker `ErrorHandler` against a single synthetic
//! device id, since the remote API is one endpoint rather than a
//! per-device transport.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use edge_breaker::ErrorHandler;
use edge_common::model::{Reading, SyncOperation};
use edge_common::{BlockingThreadpool, Id, InternalError};
use edge_remote::ApiClient;
use edge_store::StorePool;
use tokio_util::sync::CancellationToken;

const REMOTE_DEVICE_ID: &str = "remote-readings-api";

/// Maps a `RemoteError` into the message `ErrorKind::categorize`
/// dispatches on, distinguishing a terminal 4xx client error (spec.md
/// §6: "4xx is not retried by the batch") from a retryable 5xx/transport
/// failure — `RemoteError`'s own `Display` ("remote api returned 401:
/// ...") doesn't carry that distinction on its own.
fn describe_upload_error(err: edge_remote::RemoteError) -> String {
    match err {
        edge_remote::RemoteError::ApiError { status, body } if (400..500).contains(&status) => {
            format!("client error {status}: {body}")
        }
        edge_remote::RemoteError::ApiError { status, body } => {
            format!("server error {status}: {body}")
        }
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UploadReport {
    pub attempted: usize,
    pub uploaded: usize,
    pub quarantined: usize,
    pub connected: bool,
}

/// Returned when `run_cycle` is called while a previous upload is still
/// in flight (Testable Property 3 applied to the upload pipeline).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadInProgress;

#[derive(Debug, thiserror::Error)]
enum LocalStoreStepError {
    #[error("{0}")]
    Store(String),
}

impl InternalError for LocalStoreStepError {
    fn internal_error(message: String) -> Self {
        LocalStoreStepError::Store(message)
    }
}

impl From<edge_store::StoreError> for LocalStoreStepError {
    fn from(err: edge_store::StoreError) -> Self {
        LocalStoreStepError::Store(err.to_string())
    }
}

pub struct UploadManager {
    client: ApiClient,
    store: StorePool,
    blocking: Arc<BlockingThreadpool>,
    errors: Arc<ErrorHandler>,
    batch_size: i64,
    connectivity_check_interval: Duration,
    max_retries: i32,
    running: AtomicBool,
    last_connectivity_check_epoch_ms: AtomicI64,
    last_connected: AtomicBool,
    cancel: CancellationToken,
}

impl UploadManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: ApiClient,
        store: StorePool,
        blocking: Arc<BlockingThreadpool>,
        errors: Arc<ErrorHandler>,
        batch_size: i64,
        connectivity_check_interval: Duration,
        max_retries: i32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            store,
            blocking,
            errors,
            batch_size,
            connectivity_check_interval,
            max_retries,
            running: AtomicBool::new(false),
            last_connectivity_check_epoch_ms: AtomicI64::new(0),
            last_connected: AtomicBool::new(false),
            cancel,
        }
    }

    /// Triggers one upload cycle. A concurrent call while one is already
    /// running is a no-op (spec.md §4.9: "`triggerUpload` while a cycle
    /// is already running is a no-op").
    pub async fn run_cycle(&self) -> Result<UploadReport, UploadInProgress> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(UploadInProgress);
        }

        let report = self.upload_once().await;
        self.running.store(false, Ordering::Release);
        Ok(report)
    }

    async fn upload_once(&self) -> UploadReport {
        let mut report = UploadReport::default();

        if !self.connected_cached().await {
            report.connected = false;
            return report;
        }
        report.connected = true;

        let readings = match self.fetch_batch().await {
            Ok(r) => r,
            Err(e) => {
                warn!("upload cycle could not read local readings: {}", e);
                return report;
            }
        };
        if readings.is_empty() {
            return report;
        }
        report.attempted = readings.len();

        let device = Id::new(REMOTE_DEVICE_ID);
        let client = self.client.clone();
        let batch = readings.clone();
        let upload = self.errors.execute(&device, "upload", || {
            let client = client.clone();
            let batch = batch.clone();
            async move { client.post_batch(&batch).await.map_err(describe_upload_error) }
        });

        // Shutdown mid-upload must cancel the in-flight request and leave
        // the batch undeleted locally (spec.md §8 scenario S6).
        let result = tokio::select! {
            result = upload => result,
            _ = self.cancel.cancelled() => {
                self.log(readings.len() as i64, false, Some(edge_common::ErrorKind::Cancelled.to_string())).await;
                return report;
            }
        };

        match result {
            // The remote contract does not surface per-row ids (spec.md
            // §9's Open Question, resolved in DESIGN.md): only a
            // `recordsProcessed` count equal to the whole batch counts as
            // acknowledged. A lesser count is treated the same as failure
            // and the whole batch is left in place for idempotent
            // re-upload.
            Ok(outcome) if outcome.success && outcome.records_processed == readings.len() => {
                let ids: Vec<Id> = readings.iter().map(|r| r.id.clone()).collect();
                if let Err(e) = self.delete_acknowledged(ids).await {
                    warn!("uploaded batch could not be deleted locally: {}", e);
                }
                report.uploaded = readings.len();
                self.log(readings.len() as i64, true, None).await;
            }
            Ok(outcome) => {
                self.record_failed_attempt(&readings, &mut report).await;
                self.log(
                    readings.len() as i64,
                    false,
                    Some(format!(
                        "remote acknowledged {} of {} readings",
                        outcome.records_processed,
                        readings.len()
                    )),
                )
                .await;
            }
            Err(e) => {
                self.record_failed_attempt(&readings, &mut report).await;
                self.log(readings.len() as i64, false, Some(e.to_string())).await;
            }
        }

        report
    }

    async fn record_failed_attempt(&self, readings: &[Reading], report: &mut UploadReport) {
        let ids: Vec<Id> = readings.iter().map(|r| r.id.clone()).collect();
        let to_quarantine: Vec<Id> = readings
            .iter()
            .filter(|r| r.retry_count + 1 >= self.max_retries)
            .map(|r| r.id.clone())
            .collect();
        report.quarantined = to_quarantine.len();

        let store = self.store.clone();
        let result = self
            .blocking
            .spawn(move || -> Result<(), LocalStoreStepError> {
                let mut conn = store.get()?;
                edge_store::readings::increment_retry(&mut conn, &ids)?;
                if !to_quarantine.is_empty() {
                    edge_store::readings::quarantine(&mut conn, &to_quarantine)?;
                }
                Ok(())
            })
            .await;
        if let Err(e) = result {
            warn!("failed upload batch could not be marked for retry: {}", e);
            report.quarantined = 0;
        }
    }

    async fn fetch_batch(&self) -> Result<Vec<Reading>, LocalStoreStepError> {
        let store = self.store.clone();
        let batch_size = self.batch_size;
        self.blocking
            .spawn(move || -> Result<Vec<Reading>, LocalStoreStepError> {
                let mut conn = store.get()?;
                Ok(edge_store::readings::list_unsynchronized(&mut conn, batch_size)?)
            })
            .await
    }

    async fn delete_acknowledged(&self, ids: Vec<Id>) -> Result<(), LocalStoreStepError> {
        let store = self.store.clone();
        self.blocking
            .spawn(move || -> Result<(), LocalStoreStepError> {
                let mut conn = store.get()?;
                edge_store::readings::delete_ids(&mut conn, &ids)?;
                Ok(())
            })
            .await
    }

    /// Caches the connectivity probe for `connectivity_check_interval`
    /// (spec.md §4.9 step 1) instead of hitting the remote API on every
    /// call site that wants to know whether uploads are possible.
    async fn connected_cached(&self) -> bool {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let last = self.last_connectivity_check_epoch_ms.load(Ordering::Acquire);
        if now_ms - last < self.connectivity_check_interval.as_millis() as i64 {
            return self.last_connected.load(Ordering::Acquire);
        }

        let connected = self.client.check_connectivity().await;
        self.last_connectivity_check_epoch_ms.store(now_ms, Ordering::Release);
        self.last_connected.store(connected, Ordering::Release);
        connected
    }

    async fn log(&self, batch_size: i64, success: bool, error: Option<String>) {
        let store = self.store.clone();
        let _ = self
            .blocking
            .spawn(move || -> Result<(), LocalStoreStepError> {
                if let Ok(mut conn) = store.get() {
                    let _ = edge_store::sync_log::append(&mut conn, SyncOperation::Upload, batch_size, success, error);
                }
                Ok(())
            })
            .await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use edge_common::model::Quality;
    use edge_common::Id;

    fn store_with_readings(n: usize) -> StorePool {
        let store = StorePool::new(":memory:", 1).unwrap();
        let mut conn = store.get().unwrap();
        let readings: Vec<Reading> = (0..n)
            .map(|i| Reading {
                id: Id::new(format!("r{i}")),
                meter_id: Id::new("m1"),
                timestamp: chrono::Utc::now(),
                field_name: "energy_kwh".into(),
                value: 1.0,
                unit: "kWh".into(),
                quality: Quality::Good,
                synchronized: false,
                retry_count: 0,
                quarantined: false,
            })
            .collect();
        edge_store::readings::insert_batch(&mut conn, &readings).unwrap();
        store
    }

    fn manager(store: StorePool, server_url: String, batch_size: i64) -> UploadManager {
        let client = ApiClient::new(server_url, "secret", 5000).unwrap();
        UploadManager::new(
            client,
            store,
            Arc::new(BlockingThreadpool::default()),
            Arc::new(ErrorHandler::default()),
            batch_size,
            Duration::from_secs(60),
            3,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn whole_batch_ack_deletes_everything_locally() {
        let mut server = mockito::Server::new_async().await;
        server.mock("HEAD", "/api/readings/batch").with_status(200).create_async().await;
        server
            .mock("POST", "/api/readings/batch")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true,"recordsProcessed":3}"#)
            .create_async()
            .await;

        let store = store_with_readings(3);
        let mgr = manager(store.clone(), server.url(), 10);
        let report = mgr.run_cycle().await.unwrap();

        assert_eq!(report.uploaded, 3);
        let mut conn = store.get().unwrap();
        assert!(edge_store::readings::list_unsynchronized(&mut conn, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_ack_leaves_the_whole_batch_in_place() {
        let mut server = mockito::Server::new_async().await;
        server.mock("HEAD", "/api/readings/batch").with_status(200).create_async().await;
        server
            .mock("POST", "/api/readings/batch")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true,"recordsProcessed":2}"#)
            .create_async()
            .await;

        let store = store_with_readings(3);
        let mgr = manager(store.clone(), server.url(), 10);
        let report = mgr.run_cycle().await.unwrap();

        assert_eq!(report.uploaded, 0);
        let mut conn = store.get().unwrap();
        assert_eq!(edge_store::readings::list_unsynchronized(&mut conn, 10).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn a_4xx_response_is_not_retried_within_the_cycle() {
        // spec.md §6: "4xx is not retried by the batch; 5xx and
        // transport errors are." The mock expects exactly one POST; if
        // the error handler mistakenly categorized this as retryable,
        // `expect(1)` below would fail the assertion.
        let mut server = mockito::Server::new_async().await;
        server.mock("HEAD", "/api/readings/batch").with_status(200).create_async().await;
        let mock = server
            .mock("POST", "/api/readings/batch")
            .with_status(401)
            .with_body("bad api key")
            .expect(1)
            .create_async()
            .await;

        let store = store_with_readings(1);
        let mgr = manager(store.clone(), server.url(), 10);
        let report = mgr.run_cycle().await.unwrap();

        assert_eq!(report.uploaded, 0);
        mock.assert_async().await;
        let mut conn = store.get().unwrap();
        assert_eq!(edge_store::readings::list_unsynchronized(&mut conn, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn a_reading_is_quarantined_once_it_crosses_the_configured_max_retries() {
        let mut server = mockito::Server::new_async().await;
        server.mock("HEAD", "/api/readings/batch").with_status(200).create_async().await;
        server.mock("POST", "/api/readings/batch").with_status(503).create_async().await;

        let store = store_with_readings(1);
        let mgr = manager(store.clone(), server.url(), 10);
        {
            let mut conn = store.get().unwrap();
            edge_store::readings::increment_retry(&mut conn, &[Id::new("r0")]).unwrap();
            edge_store::readings::increment_retry(&mut conn, &[Id::new("r0")]).unwrap();
        }

        let report = mgr.run_cycle().await.unwrap();
        assert_eq!(report.quarantined, 1);
        let mut conn = store.get().unwrap();
        assert!(edge_store::readings::list_unsynchronized(&mut conn, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn disconnected_remote_skips_the_cycle_without_touching_readings() {
        let server = mockito::Server::new_async().await;
        let store = store_with_readings(1);
        let mgr = manager(store.clone(), server.url(), 10);
        let report = mgr.run_cycle().await.unwrap();

        assert!(!report.connected);
        assert_eq!(report.attempted, 0);
        let mut conn = store.get().unwrap();
        assert_eq!(edge_store::readings::list_unsynchronized(&mut conn, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn a_second_concurrent_cycle_is_rejected() {
        let server = mockito::Server::new_async().await;
        let store = store_with_readings(1);
        let mgr = manager(store, server.url(), 10);
        mgr.running.store(true, Ordering::Release);
        assert_eq!(mgr.run_cycle().await, Err(UploadInProgress));
    }
}
