//! Relay process for the MDB event pipeline.
//!
//! Reads catalog events as newline-delimited JSON on stdin and feeds them
//! through the emitter to every configured handler. Runs until stdin closes
//! or Ctrl-C is received, then shuts the pipeline down with the configured
//! deadline so undelivered events are spooled for the next start.
//!
//! # Startup Sequence
//!
//! 1. Load settings from `MDB_EVENTS_CONFIG` (default `mdb-events.toml`)
//!    plus `MDB__*` environment overrides
//! 2. Initialize structured logging (tracing)
//! 3. Build handlers and start the emitter
//! 4. Relay stdin until EOF or Ctrl-C
//! 5. Close the emitter

mod input;

use std::path::PathBuf;

use anyhow::Context as _;
use mdb_events::{Emitter, EventsSettings, close_emitter, init_emitter};
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Default settings file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "mdb-events.toml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if settings are invalid, a handler cannot be built, or
/// the pipeline fails to preserve undelivered events at shutdown.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("MDB_EVENTS_CONFIG")
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let settings = EventsSettings::load(&config_path)
        .with_context(|| format!("loading settings from {}", config_path.display()))?;

    init_logging(settings.logging.json);
    info!(
        config = %config_path.display(),
        handlers = ?settings.events.handlers,
        emitter_size = settings.events.emitter_size,
        "mdb-relay starting"
    );

    let emitter = init_emitter(&settings)
        .await
        .context("initializing event emitter")?;

    let interrupted = tokio::select! {
        result = relay_stdin(&emitter) => {
            result?;
            false
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
            true
        }
    };

    close_emitter(&emitter, &settings)
        .await
        .context("closing event emitter")?;
    info!("shutdown complete");

    // The stdin reader thread can block runtime teardown until the next line.
    if interrupted {
        std::process::exit(0);
    }
    Ok(())
}

/// Initialize structured logging, as text or JSON lines.
fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Forward stdin lines to the emitter until EOF.
async fn relay_stdin(emitter: &Emitter) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no: u64 = 0;
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        line_no = line_no.saturating_add(1);
        match input::parse_line(&line) {
            Ok(Some(event)) => emitter.emit([event]).await,
            Ok(None) => {}
            Err(e) => warn!(line = line_no, error = %e, "skipping malformed event"),
        }
    }
    info!(lines = line_no, "stdin closed");
    Ok(())
}
