//! Tracing setup shared by the server and worker binaries.
//!
//! Every process gets a compact stdout layer filtered through `RUST_LOG`
//! (`info` when unset). A second layer appends to a file: the path named by
//! `TAONGA_LOG_FILE`, or `logs/taonga.log` when the variable is absent. File
//! writes go through a non-blocking appender whose guard lives for the
//! process lifetime.
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global tracing subscriber.
///
/// A failure to open the log file disables the file layer and is reported on
/// stderr; stdout logging always comes up.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    match file_writer() {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}

fn file_writer() -> Option<NonBlocking> {
    let (non_blocking, guard) = match std::env::var("TAONGA_LOG_FILE") {
        Ok(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|err| eprintln!("Failed to open log file {path}: {err}"))
                .ok()?;
            tracing_appender::non_blocking(file)
        }
        Err(_) => {
            std::fs::create_dir_all("logs")
                .map_err(|err| eprintln!("Failed to create logs directory: {err}"))
                .ok()?;
            tracing_appender::non_blocking(tracing_appender::rolling::never("logs", "taonga.log"))
        }
    };
    let _ = LOG_GUARD.set(guard);
    Some(non_blocking)
}
