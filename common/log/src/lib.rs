//! Logging tools and their initialization.

#![deny(
    rustdoc::broken_intra_doc_links,
    missing_debug_implementations,
    nonstandard_style,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code
)]
#![warn(
    deprecated_in_future,
    missing_docs,
    unreachable_pub,
    unused_import_braces,
    unused_labels,
    unused_lifetimes,
    unused_qualifications
)]

pub mod remote;

pub use tracing;
pub use tracing::Level;
pub use tracing_log::log;

use std::{path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter,
};

/// Output format of the local log stream.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-oriented, single-line-per-event text.
    #[default]
    Compact,

    /// Machine-oriented `JSON` lines, one object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(format!("unknown log format: `{s}`")),
        }
    }
}

/// Immutable configuration describing how the process-wide [`tracing`]
/// subscriber should be assembled.
///
/// Built once at entry and consumed by [`TelemetryConfig::init`]; nothing
/// here is a process-wide global prior to that call.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    level: Level,
    format: LogFormat,
    log_file: Option<PathBuf>,
    remote: Option<remote::RemoteLoggingConfig>,
}

impl TelemetryConfig {
    /// Creates a new [`TelemetryConfig`] defaulting to [`Level::INFO`] and
    /// [`LogFormat::Compact`].
    #[inline]
    #[must_use]
    pub fn new(level: Option<Level>) -> Self {
        Self {
            level: level.unwrap_or(Level::INFO),
            format: LogFormat::default(),
            log_file: None,
            remote: None,
        }
    }

    /// Sets the local log output [`LogFormat`].
    #[inline]
    #[must_use]
    pub fn log_format(mut self, format: Option<LogFormat>) -> Self {
        if let Some(format) = format {
            self.format = format;
        }
        self
    }

    /// Additionally mirrors every log line into the given file, appending
    /// to it across restarts.
    #[inline]
    #[must_use]
    pub fn log_file(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }

    /// Enables shipping of captured log records to a remote collector, per
    /// the given [`remote::RemoteLoggingConfig`].
    #[inline]
    #[must_use]
    pub fn remote_logging(
        mut self,
        config: Option<remote::RemoteLoggingConfig>,
    ) -> Self {
        self.remote = config;
        self
    }

    /// Initializes the global [`tracing`] subscriber described by this
    /// [`TelemetryConfig`], returning a handle that must be kept alive for
    /// the configured remote-shipping task and file mirror (if any) to keep
    /// running.
    ///
    /// # Panics
    ///
    /// If a global subscriber has already been installed, or if `log_file`
    /// was set and the file could not be opened for appending.
    pub fn init(self) -> TelemetryGuard {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.to_string()));

        let remote_handle = self.remote.map(remote::spawn_shipper);
        let remote_layer = remote_handle.as_ref().map(|h| h.layer());

        let file_layer_and_guard = self.log_file.map(|path| {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .unwrap_or_else(|e| {
                    panic!("failed to open log file {}: {e}", path.display())
                });
            let (writer, guard) = tracing_appender::non_blocking(file);
            (fmt::layer().with_ansi(false).with_writer(writer), guard)
        });
        let (file_layer, file_guard) = match file_layer_and_guard {
            Some((layer, guard)) => (Some(layer), Some(guard)),
            None => (None, None),
        };

        let registry = tracing_subscriber::registry()
            .with(filter)
            .with(remote_layer)
            .with(file_layer);

        match self.format {
            LogFormat::Json => {
                registry.with(fmt::layer().json()).try_init()
            }
            LogFormat::Compact => {
                registry.with(fmt::layer().compact()).try_init()
            }
        }
        .expect("failed to install global tracing subscriber");

        TelemetryGuard {
            _remote: remote_handle,
            _file_guard: file_guard,
        }
    }
}

/// Guard returned by [`TelemetryConfig::init`]; dropping it stops the remote
/// log-shipping task (if one was configured) and flushes the file mirror's
/// background writer (if one was configured).
#[derive(Debug)]
pub struct TelemetryGuard {
    _remote: Option<remote::ShipperHandle>,
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}
