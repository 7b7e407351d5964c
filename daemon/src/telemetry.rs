//! Logging setup for the daemon
//!
//! Every event lands in the audit file as
//! `[dd-mm-yy HH:MM:SS] - [LEVEL]: message`, optionally echoed to stderr.

use anyhow::{Context, Result};
use chrono::Local;
use replica_sync::TIMESTAMP_FORMAT;
use std::fmt;
use std::path::Path;
use tracing::{Event, Level, Subscriber};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{format, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Event formatter producing audit log lines
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditFormat;

impl<S, N> FormatEvent<S, N> for AuditFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(
            writer,
            "[{}] - [{}]: ",
            Local::now().format(TIMESTAMP_FORMAT),
            level_label(*event.metadata().level())
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Audit lines carry INFO or ERROR; DEBUG and TRACE only appear when asked for
fn level_label(level: Level) -> &'static str {
    match level {
        Level::ERROR | Level::WARN => "ERROR",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

fn env_filter(log_level: &str) -> EnvFilter {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("replica_sync={},replica_daemon={}", level, level))
    })
}

/// Install the global subscriber writing to `log_file_path`.
///
/// The returned guard flushes the file writer on drop and must be held
/// until the process exits.
pub fn initialize_logging(log_file_path: &Path, log_level: &str, console: bool) -> Result<WorkerGuard> {
    let directory = match log_file_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = log_file_path
        .file_name()
        .with_context(|| format!("Log file path must name a file: {}", log_file_path.display()))?;

    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

    let file_appender = rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .event_format(AuditFormat)
        .with_writer(non_blocking);

    let console_layer = console.then(|| {
        tracing_subscriber::fmt::layer()
            .event_format(AuditFormat)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install logging subscriber")?;

    Ok(guard)
}

/// Stderr-only logging for commands that never start mirroring
pub fn init_basic_logging(log_level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(AuditFormat)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("Failed to install logging subscriber")?;
    Ok(())
}
