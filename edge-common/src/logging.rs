//! Structured logging init, ported from the teacher's
//! `syncserver/src/logging.rs`: a json `slog-mozlog-json` drain for
//! production, a human-readable `slog-term` drain otherwise, both wrapped
//! in `slog-envlogger` (for `RUST_LOG`-style filtering) and `slog-async`
//! (so logging never blocks a pipeline on I/O).

use std::io;

use slog::{slog_o, Drain};

/// Initializes the global `slog` logger. `json` selects the mozlog JSON
/// drain (for ingestion by a log pipeline) over the human-readable
/// terminal drain.
pub fn init_logging(json: bool) -> Result<(), String> {
    let logger = if json {
        let hostname = hostname::get()
            .map_err(|e| format!("couldn't get hostname: {e}"))?
            .into_string()
            .map_err(|_| "hostname was not valid utf-8".to_owned())?;

        let drain = slog_mozlog_json::MozLogJson::new(io::stdout())
            .logger_name(format!("{}-{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")))
            .msg_type(format!("{}:log", env!("CARGO_PKG_NAME")))
            .hostname(hostname)
            .build()
            .fuse();
        let drain = slog_envlogger::new(drain);
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog_o!())
    } else {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_envlogger::new(drain);
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog_o!())
    };

    slog_scope::set_global_logger(logger).cancel_reset();
    slog_stdlog::init().map_err(|e| format!("slog_stdlog::init failed: {e}"))?;
    Ok(())
}

/// Restores a discarding logger. Called during shutdown so no component
/// holding a stale `slog_scope` guard panics trying to log after the
/// process has started tearing itself down.
pub fn reset_logging() {
    let logger = slog::Logger::root(slog::Discard, slog_o!());
    slog_scope::set_global_logger(logger).cancel_reset();
}
