//! Edge Sync Agent binary (spec.md §4.10): wires every pipeline crate
//! together and runs the startup/shutdown sequence, grounded on the
//! teacher's `syncserver/src/main.rs` — sequential construction, then
//! block on the running system until a shutdown signal arrives.

#[macro_use]
extern crate slog_scope;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use edge_breaker::{CircuitBreaker, ErrorHandler, RetryPolicy};
use edge_cache::CacheLayer;
use edge_collector::Collector;
use edge_common::{init_logging, reset_logging, statsd_client, BlockingThreadpool, Metrics};
use edge_pool::{Pool as ConnPool, PoolConfig};
use edge_remote::{ApiClient, RemoteDbPool};
use edge_scheduler::{cleanup::CleanupAgent, AutoStartFlags, Scheduler};
use edge_settings::{blocking_threadpool_size, Settings};
use edge_store::StorePool;
use edge_sync::{PullSyncManager, UploadManager};

/// Reads local tenant/meter/register/device-register rows from the
/// store and pushes them into the cache, mirroring the read half of
/// `PullSyncManager::sync_once` so the very first collection cycle
/// (which runs only after the mandatory initial pull-sync below has
/// already populated the store) sees a warm cache without waiting on a
/// second network round trip.
fn warm_cache_from_store(store: &StorePool, cache: &CacheLayer) -> Result<(), edge_store::StoreError> {
    let mut conn = store.get()?;
    let tenant = edge_store::tenant::current(&mut conn)?;
    let meters = edge_store::meters::list_all(&mut conn)?;
    let registers = edge_store::registers::list_registers(&mut conn)?;
    let device_registers = edge_store::registers::list_device_registers(&mut conn)?;
    cache.reload_all(tenant, meters, registers, device_registers);
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "edge-agent", about = "Facility meter collection and sync agent")]
struct Args {
    /// Path to a config file layered under the EDGE__ environment overrides.
    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let settings = match Settings::with_env_and_config_file(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(!settings.human_logs).expect("logging failed to initialize");
    debug!("starting up...");
    let _sentry = sentry::init(sentry::ClientOptions {
        release: sentry::release_name!(),
        ..sentry::ClientOptions::default()
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(blocking_threadpool_size(&settings))
        .build()
        .expect("failed to build tokio runtime");

    let exit = runtime.block_on(run(settings));
    reset_logging();
    exit
}

async fn run(settings: Settings) -> ExitCode {
    let banner = settings.banner();

    let store = match StorePool::new(&settings.local_db.database_url(), 8) {
        Ok(store) => store,
        Err(e) => {
            error!("local store init failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let blocking = Arc::new(BlockingThreadpool::default());

    let remote = match RemoteDbPool::new(
        &settings.remote_db.database_url(),
        settings.remote_db.pool_max_size,
        blocking.clone(),
    ) {
        Ok(remote) => remote,
        Err(e) => {
            error!("remote db pool init failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let client = match ApiClient::new(
        settings.client_api.url.clone(),
        settings.client_api.api_key.clone(),
        settings.client_api.timeout_ms,
    ) {
        Ok(client) => client,
        Err(e) => {
            error!("remote readings api client init failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let metrics = Metrics::new(statsd_client(
        "edge_agent",
        settings.statsd_host.as_deref().unwrap_or("localhost"),
        settings.statsd_port,
    ));

    let cache = Arc::new(CacheLayer::new());
    if let Err(e) = warm_cache_from_store(&store, &cache) {
        warn!("initial cache warm from local store skipped: {}", e);
    }

    let conn_pool = ConnPool::new(PoolConfig::default());
    conn_pool.spawn_health_check_task();

    let errors = Arc::new(ErrorHandler::new(
        CircuitBreaker::with_defaults(),
        RetryPolicy {
            max_retries: settings.client_api.max_retries,
            ..RetryPolicy::default()
        },
    ));

    let cancel = CancellationToken::new();

    let collector = Arc::new(Collector::new(
        cache.clone(),
        conn_pool.clone(),
        store.clone(),
        errors.clone(),
        Duration::from_millis(settings.bacnet.read_timeout_ms),
    ));

    let upload = Arc::new(UploadManager::new(
        client,
        store.clone(),
        blocking.clone(),
        errors.clone(),
        settings.client_api.batch_size as i64,
        Duration::from_secs(settings.client_api.connectivity_check_interval_secs),
        settings.client_api.max_retries as i32,
        cancel.clone(),
    ));

    let pull_sync = Arc::new(PullSyncManager::new(
        remote,
        store.clone(),
        cache.clone(),
        blocking.clone(),
        cancel.clone(),
    ));

    let cleanup = Arc::new(CleanupAgent::new(
        store.clone(),
        blocking.clone(),
        settings.scheduler.reading_retention_days,
        settings.scheduler.log_retention_days,
    ));

    let scheduler = match Scheduler::new(
        collector,
        upload,
        pull_sync,
        cleanup,
        errors,
        Duration::from_secs(settings.scheduler.collection_interval_seconds),
        &settings.scheduler.upload_cron,
        Duration::from_secs(settings.scheduler.pull_sync_interval_minutes * 60),
        Duration::from_secs(settings.scheduler.shutdown_timeout_secs),
        AutoStartFlags {
            collection: settings.scheduler.collection_auto_start,
            upload: settings.scheduler.upload_auto_start,
            pull_sync: settings.scheduler.pull_sync_auto_start,
            cleanup: settings.scheduler.cleanup_auto_start,
        },
        cancel.clone(),
    ) {
        Ok(scheduler) => Arc::new(scheduler),
        Err(e) => {
            error!("invalid upload_cron schedule: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // spec.md §4.10: the initial pull-sync runs to completion before any
    // collection/upload cycle is allowed to start; a failure here is
    // fail-start, not a degraded-start.
    if scheduler.start().await.is_err() {
        error!("initial pull-sync failed, refusing to start");
        return ExitCode::FAILURE;
    }
    info!("{}", banner);

    spawn_pool_metrics_reporter(conn_pool.clone(), blocking.clone(), metrics, Duration::from_secs(30));

    let shutting_down = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let control_api = if settings.scheduler.control_api_auto_start {
        let state = edge_api::AppState {
            scheduler: scheduler.clone(),
            store: store.clone(),
            cache: cache.clone(),
            blocking: blocking.clone(),
            shutting_down: shutting_down.clone(),
        };
        match edge_api::run(state, settings.control_api.port) {
            Ok(server) => Some(server),
            Err(e) => {
                error!("control api failed to bind: {}", e);
                scheduler.shutdown().await;
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining in-flight cycles");
    shutting_down.store(true, std::sync::atomic::Ordering::Release);

    if let Some(control_api) = &control_api {
        control_api.stop(true).await;
    }
    scheduler.shutdown().await;
    conn_pool.close_all().await;
    info!("shutdown complete");

    ExitCode::SUCCESS
}

async fn wait_for_shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to install ctrl-c handler, shutting down immediately");
    }
}

fn spawn_pool_metrics_reporter(
    pool: Arc<edge_pool::Pool>,
    blocking: Arc<BlockingThreadpool>,
    metrics: Metrics,
    interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let stats = pool.stats();
            metrics.gauge("transport_pool.active", stats.active as u64);
            metrics.gauge("transport_pool.idle", stats.idle as u64);
            metrics.gauge("blocking_threadpool.active", blocking.active_tasks());
        }
    });
}
