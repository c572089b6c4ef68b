//! Logging setup with a reloadable filter.
//!
//! Console output is pretty or JSON. With a log directory, everything is also
//! written to a daily `push-dispatch.log`, and dispatch audit records get
//! their own daily `push-audit.log` in JSON.

use chrono::Local;
use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::filter_fn,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::config::LogFormat;
use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "push_dispatch=info,sqlx=warn";

/// Target used for dispatch audit records.
pub const AUDIT_TARGET: &str = "push_dispatch::audit";

const LOG_FILE_PREFIX: &str = "push-dispatch.log";
const AUDIT_FILE_PREFIX: &str = "push-audit.log";

/// Formats timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Type alias for the reload handle.
pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Handle to the installed subscriber.
pub struct LoggingConfig {
    handle: FilterHandle,
    _file_guards: Vec<WorkerGuard>,
}

impl LoggingConfig {
    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Set a new filter directive (e.g. "push_dispatch=debug,sqlx=warn").
    pub fn set_filter(&self, directive: &str) -> Result<()> {
        let new_filter = EnvFilter::try_new(directive)
            .map_err(|e| Error::Other(format!("Invalid filter directive: {}", e)))?;

        self.handle
            .reload(new_filter)
            .map_err(|e| Error::Other(format!("Failed to reload filter: {}", e)))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }
}

/// Build the initial filter: `RUST_LOG` if valid, else the default.
fn initial_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber.
///
/// Keep the returned `LoggingConfig` alive for the life of the process; it
/// owns the file writer guards.
pub fn init_logging(format: LogFormat, log_dir: Option<&Path>) -> Result<LoggingConfig> {
    let (filter_layer, handle) = reload::Layer::new(initial_filter());

    let mut file_guards = Vec::new();
    let mut file_layers = Vec::new();
    if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir)?;

        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));
        file_guards.push(guard);
        file_layers.push(
            fmt::layer()
                .with_timer(LocalTimer)
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );

        let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
            dir,
            AUDIT_FILE_PREFIX,
        ));
        file_guards.push(guard);
        file_layers.push(
            fmt::layer()
                .json()
                .with_timer(LocalTimer)
                .with_writer(writer)
                .with_filter(filter_fn(is_audit_record))
                .boxed(),
        );
    }

    let console_layer = match format {
        LogFormat::Json => fmt::layer().json().with_timer(LocalTimer).boxed(),
        LogFormat::Pretty => fmt::layer().with_timer(LocalTimer).boxed(),
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(console_layer)
        .with(file_layers)
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to install tracing subscriber: {}", e)))?;

    Ok(LoggingConfig {
        handle,
        _file_guards: file_guards,
    })
}

fn is_audit_record(metadata: &tracing::Metadata<'_>) -> bool {
    metadata.target() == AUDIT_TARGET
}
