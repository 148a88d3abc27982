//! Control API handlers (spec.md §4.11), grounded on the teacher's
//! `syncserver::web::handlers` — handlers return `Result<HttpResponse,
//! ApiError>` and reach local-store data through the shared
//! `BlockingThreadpool`, same as the collection and sync pipelines.

use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use edge_common::Id;
use edge_store::meters::MeterStatus;
use edge_store::sync_log::SyncLogStats;

use crate::error::ApiError;
use crate::state::AppState;

/// Build-time version string embedded the way `syncserver`'s
/// `/__version__` serves its `version.json` via `include_str!`.
const VERSION_JSON: &str = include_str!("../version.json");

async fn block<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, edge_store::StoreError> + Send + 'static,
    T: Send + 'static,
{
    state.blocking.spawn(f).await.map_err(ApiError::from)
}

/// `GET /status` (spec.md §4.11, §7: "aggregated in the Control API's
/// `/status` response").
#[derive(Serialize)]
struct StatusResponse {
    scheduler: edge_scheduler::SchedulerStatus,
    sync_log_24h: SyncLogStats,
    recent_sync_log: Vec<edge_common::model::SyncLogEntry>,
    cached_meters: usize,
    quarantined_readings: i64,
}

pub async fn get_status(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let store = state.store.clone();
    let (sync_log_24h, recent_sync_log, quarantined_readings) = block(&state, move || {
        let mut conn = store.get()?;
        let stats = edge_store::sync_log::stats(&mut conn, 24)?;
        let recent = edge_store::sync_log::list_recent(&mut conn, 20)?;
        let quarantined = edge_store::readings::count_quarantined(&mut conn)?;
        Ok((stats, recent, quarantined))
    })
    .await?;

    Ok(HttpResponse::Ok().json(StatusResponse {
        scheduler: state.scheduler.status(),
        sync_log_24h,
        recent_sync_log,
        cached_meters: state.cache.list_meters().len(),
        quarantined_readings,
    }))
}

/// `GET /__heartbeat__` (spec.md §4.11 AMBIENT), grounded on the teacher's
/// `syncserver::web::handlers::heartbeat`: a deep check that the local
/// store is reachable, with a cache size summary alongside it.
pub async fn heartbeat(state: web::Data<AppState>) -> HttpResponse {
    let mut checklist: HashMap<String, Value> = HashMap::new();
    checklist.insert("version".to_owned(), Value::String(env!("CARGO_PKG_VERSION").to_owned()));
    checklist.insert("cached_meters".to_owned(), Value::from(state.cache.list_meters().len()));

    let store = state.store.clone();
    let store_check = block(&state, move || {
        let mut conn = store.get()?;
        edge_store::readings::count_quarantined(&mut conn)
    })
    .await;

    match store_check {
        Ok(quarantined) => {
            checklist.insert("status".to_owned(), Value::from("Ok"));
            checklist.insert("local_store".to_owned(), Value::from("Ok"));
            checklist.insert("quarantined_readings".to_owned(), Value::from(quarantined));
            HttpResponse::Ok().json(checklist)
        }
        Err(e) => {
            warn!("heartbeat local store check failed: {}", e);
            checklist.insert("status".to_owned(), Value::from("Err"));
            checklist.insert("local_store".to_owned(), Value::from("Err"));
            HttpResponse::ServiceUnavailable().json(checklist)
        }
    }
}

/// `GET /__lbheartbeat__` (spec.md §4.11 AMBIENT): shallow liveness check
/// for a load balancer/orchestrator; always 200 unless the process is
/// draining toward shutdown.
pub async fn lbheartbeat(state: web::Data<AppState>) -> HttpResponse {
    if state.is_shutting_down() {
        return HttpResponse::ServiceUnavailable().json(HashMap::<String, Value>::new());
    }
    HttpResponse::Ok().json(HashMap::<String, Value>::new())
}

/// `GET /__version__` (spec.md §4.11 AMBIENT).
pub async fn version() -> HttpResponse {
    HttpResponse::Ok().content_type("application/json").body(VERSION_JSON)
}

/// `POST /triggers/collect`.
pub async fn trigger_collect(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    match state.scheduler.trigger_collect().await {
        Ok(report) => Ok(HttpResponse::Ok().json(report)),
        Err(_) => Err(ApiError::cycle_in_progress("collection")),
    }
}

/// `POST /triggers/upload`.
pub async fn trigger_upload(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    match state.scheduler.trigger_upload().await {
        Ok(report) => Ok(HttpResponse::Ok().json(report)),
        Err(_) => Err(ApiError::cycle_in_progress("upload")),
    }
}

/// `POST /triggers/pull-sync`. Pull-sync never returns `InProgress` at
/// this layer (spec.md §4.8 serializes the pipeline internally and just
/// reports whether caches were reloaded), so this can't 409.
pub async fn trigger_pull_sync(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let report = state.scheduler.trigger_pull_sync().await;
    Ok(HttpResponse::Ok().json(report))
}

#[derive(Deserialize)]
pub struct ReadingsQuery {
    meter_id: Option<String>,
    hours: Option<i64>,
    limit: Option<i64>,
}

/// `GET /readings?meter_id&hours&limit` (spec.md §4.11).
pub async fn get_readings(
    state: web::Data<AppState>,
    query: web::Query<ReadingsQuery>,
) -> Result<HttpResponse, ApiError> {
    let hours = query.hours.unwrap_or(24);
    if hours <= 0 {
        return Err(ApiError::bad_request("hours must be positive"));
    }
    let limit = query.limit.unwrap_or(100).clamp(1, 10_000);
    let meter_id = query.meter_id.clone().map(Id::new);
    let since = chrono::Utc::now() - chrono::Duration::hours(hours);

    let store = state.store.clone();
    let readings = block(&state, move || {
        let mut conn = store.get()?;
        edge_store::readings::list_recent(&mut conn, meter_id.as_ref(), since, limit)
    })
    .await?;

    Ok(HttpResponse::Ok().json(readings))
}

/// `GET /meters`.
pub async fn list_meters(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let store = state.store.clone();
    let meters: Vec<MeterStatus> = block(&state, move || {
        let mut conn = store.get()?;
        edge_store::meters::list_status(&mut conn)
    })
    .await?;
    Ok(HttpResponse::Ok().json(meters))
}

/// `GET /meters/{id}`.
pub async fn get_meter(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let id = Id::new(path.into_inner());
    let store = state.store.clone();
    let lookup_id = id.clone();
    let meter = block(&state, move || {
        let mut conn = store.get()?;
        edge_store::meters::get_status(&mut conn, &lookup_id)
    })
    .await?;

    match meter {
        Some(meter) => Ok(HttpResponse::Ok().json(meter)),
        None => Err(ApiError::not_found(format!("meter {} not found", id))),
    }
}
