//! Daemon logging initialization.
//!
//! Structured `tracing` output goes to stderr (level controlled by
//! `RUST_LOG`) and to a rolling file under the daemon home. Initialization
//! is global and idempotent: only the first daemon in a process wins, so
//! tests creating several daemons do not fight over the subscriber.

use std::sync::OnceLock;

use hyperpod_shared::errors::HyperpodResult;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::daemon::DaemonLayout;
use crate::daemon::constants::dirs;

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize tracing for a daemon home. Subsequent calls are no-ops.
pub fn init_logging_for(layout: &DaemonLayout) -> HyperpodResult<()> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let file_appender = tracing_appender::rolling::daily(layout.logs_dir(), dirs::LOG_FILE);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false),
        )
        .try_init();

    // Another subscriber (a test harness, an embedding application) may
    // already be installed; that is fine.
    if let Err(e) = result {
        tracing::debug!("tracing subscriber already set: {}", e);
    }

    let _ = INITIALIZED.set(());
    Ok(())
}
