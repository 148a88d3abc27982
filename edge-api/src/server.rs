//! Control API HTTP server, grounded on the teacher's
//! `syncserver::server::Server::with_settings` — an `HttpServer` built
//! from a state factory closure and handed back as a `dev::Server` the
//! caller can `.await` or hold onto for a graceful `.stop(true)`.
//!
//! Unlike the teacher's public-facing server, this one binds loopback
//! only (spec.md §4.11: "listens on 127.0.0.1") and carries no CORS,
//! auth, or WeaveTimestamp-style middleware — nothing outside the host
//! can reach it.

use actix_web::{dev, web, App, HttpServer};

use crate::handlers;
use crate::state::AppState;

/// Builds and binds the Control API, returning the running server
/// handle without awaiting it (spec.md §4.10: started alongside the
/// scheduler, not blocking startup).
pub fn run(state: AppState, port: u16) -> std::io::Result<dev::Server> {
    let state = web::Data::new(state);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/status", web::get().to(handlers::get_status))
            .route("/triggers/collect", web::post().to(handlers::trigger_collect))
            .route("/triggers/upload", web::post().to(handlers::trigger_upload))
            .route("/triggers/pull-sync", web::post().to(handlers::trigger_pull_sync))
            .route("/readings", web::get().to(handlers::get_readings))
            .route("/meters", web::get().to(handlers::list_meters))
            .route("/meters/{id}", web::get().to(handlers::get_meter))
            .route("/__heartbeat__", web::get().to(handlers::heartbeat))
            .route("/__lbheartbeat__", web::get().to(handlers::lbheartbeat))
            .route("/__version__", web::get().to(handlers::version))
    })
    .workers(1)
    .bind(("127.0.0.1", port))?
    .run();

    Ok(server)
}
