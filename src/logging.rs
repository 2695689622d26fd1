//! Logging setup.
//!
//! Diagnostics always go to stderr so that stdout carries nothing but the
//! JSON response. An optional log directory adds a daily rolling file.
//!
//! Log level can be controlled via the `FACEPROBE_LOG` environment variable:
//! - `FACEPROBE_LOG=debug` for verbose output
//! - `FACEPROBE_LOG=info` for standard output (default)
//! - `FACEPROBE_LOG=warn` for warnings and errors only
//! - `FACEPROBE_LOG=error` for errors only

use anyhow::Result;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system. Call once, before any work is done.
pub fn init(log_dir: Option<PathBuf>) -> Result<()> {
    let env_filter = EnvFilter::try_from_env("FACEPROBE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal());

    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .try_init()?;
        return Ok(());
    };

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "faceprobe.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes the file writer on drop, so it has to outlive main's work.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()?;

    tracing::debug!("File logging enabled at {:?}", log_dir);
    Ok(())
}
