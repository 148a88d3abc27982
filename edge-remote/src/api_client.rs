//! HTTP client for the remote readings API (spec.md §6: `POST
//! /api/readings/batch`), grounded on the teacher's `reqwest`-based FxA
//! client pattern in `syncserver` (a bearer-header POST with a typed
//! JSON body and response).

use std::time::Duration;

use edge_common::model::Reading;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, RemoteResult};

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct ReadingDto {
    meter_id: String,
    timestamp: String,
    field_name: String,
    value: f64,
    unit: String,
    quality: &'static str,
}

#[derive(Serialize)]
struct BatchRequest {
    readings: Vec<ReadingDto>,
}

#[derive(Deserialize)]
struct BatchResponse {
    success: bool,
    #[serde(default, rename = "recordsProcessed")]
    records_processed: usize,
}

/// Outcome of one `POST /api/readings/batch` call (spec.md §4.9 steps
/// 4-6).
#[derive(Debug, Clone, Copy)]
pub struct UploadOutcome {
    pub success: bool,
    pub records_processed: usize,
}

fn quality_str(q: edge_common::model::Quality) -> &'static str {
    match q {
        edge_common::model::Quality::Good => "good",
        edge_common::model::Quality::Estimated => "estimated",
        edge_common::model::Quality::Questionable => "questionable",
    }
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout_ms: u64) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    /// Lightweight connectivity probe (spec.md §4.9 step 1). A non-2xx or
    /// transport error both count as "disconnected"; the push-sync
    /// manager is responsible for caching this result for
    /// `connectivityCheckInterval`.
    pub async fn check_connectivity(&self) -> bool {
        let url = format!("{}/api/readings/batch", self.base_url.trim_end_matches('/'));
        match self.client.head(&url).header("X-Api-Key", &self.api_key).send().await {
            Ok(resp) => resp.status().is_success() || resp.status() == StatusCode::METHOD_NOT_ALLOWED,
            Err(_) => false,
        }
    }

    /// Posts one batch (spec.md §6's wire contract). 4xx responses are
    /// reported as `RemoteError::ApiError` (not retried by the caller);
    /// 5xx and transport errors surface as `RemoteError::Http`/`ApiError`
    /// and are retryable.
    pub async fn post_batch(&self, readings: &[Reading]) -> RemoteResult<UploadOutcome> {
        let body = BatchRequest {
            readings: readings
                .iter()
                .map(|r| ReadingDto {
                    meter_id: r.meter_id.0.clone(),
                    timestamp: r.timestamp.to_rfc3339(),
                    field_name: r.field_name.clone(),
                    value: r.value,
                    unit: r.unit.clone(),
                    quality: quality_str(r.quality),
                })
                .collect(),
        };

        let url = format!("{}/api/readings/batch", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RemoteError::ApiError {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: BatchResponse = resp.json().await?;
        Ok(UploadOutcome {
            success: parsed.success,
            records_processed: parsed.records_processed,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;
    use edge_common::model::Quality;
    use edge_common::Id;

    fn reading() -> Reading {
        Reading {
            id: Id::new("r1"),
            meter_id: Id::new("m1"),
            timestamp: Utc::now(),
            field_name: "energy_kwh".into(),
            value: 12.5,
            unit: "kWh".into(),
            quality: Quality::Good,
            synchronized: false,
            retry_count: 0,
            quarantined: false,
        }
    }

    #[tokio::test]
    async fn post_batch_parses_success_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/readings/batch")
            .match_header("x-api-key", "secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true,"recordsProcessed":1}"#)
            .create_async()
            .await;

        let client = ApiClient::new(server.url(), "secret", 5000).unwrap();
        let outcome = client.post_batch(&[reading()]).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.records_processed, 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn post_batch_surfaces_4xx_as_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/readings/batch")
            .with_status(401)
            .with_body("bad api key")
            .create_async()
            .await;

        let client = ApiClient::new(server.url(), "wrong", 5000).unwrap();
        let result = client.post_batch(&[reading()]).await;
        assert!(matches!(result, Err(RemoteError::ApiError { status: 401, .. })));
    }
}
