//! Edge stream supervisor: a long-running agent that manages external
//! RTSP-to-RTMP transcoder child processes, driven by remote-control
//! commands delivered over a Server-Sent Events channel from a control
//! plane.

#![allow(clippy::unreadable_literal)]
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

pub mod cli;
pub mod config;
pub mod control_plane;
pub mod driver;
pub mod error;
pub mod lifecycle;
mod proc;
pub mod record;
pub mod recovery;
pub mod store;
pub mod supervisor;

use std::{any::Any, sync::Arc};

use courtstream_log::{remote::RemoteLoggingConfig, tracing, TelemetryConfig};
use tokio::sync::{mpsc, watch};

pub use self::config::Config;
use self::{
    control_plane::{ClientConfig, ControlPlaneClient},
    driver::TranscoderDriver,
    lifecycle::InstanceLock,
    store::RecordStore,
    supervisor::Supervisor,
};

/// Runs the agent to completion: resolves configuration, initializes
/// telemetry, acquires the single-instance lock, then drives the
/// control-plane subscription and the supervisor event loop side by side
/// until a termination signal arrives.
///
/// # Errors
///
/// If running has failed and could not be performed. The appropriate error
/// is logged.
pub fn run() -> Result<(), cli::Failure> {
    let opts = cli::Opts::from_args();
    let config = config::Config::try_from_opts(opts)?;

    let remote_logging = config.remote_logging.endpoint.clone().map(|endpoint| {
        RemoteLoggingConfig {
            endpoint,
            batch_size: config.remote_logging.batch_size,
            batch_interval: config.remote_logging.batch_interval,
            max_memory_usage: config.remote_logging.max_memory_usage,
            retry_attempts: config.remote_logging.retry_attempts,
            retry_delay: config.remote_logging.retry_delay,
        }
    });
    let _telemetry = TelemetryConfig::new(Some(config.log_level))
        .log_format(Some(config.log_format))
        .log_file(config.log_file.clone())
        .remote_logging(remote_logging)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            cli::Failure::from(error::Fatal::Config(format!(
                "failed to start async runtime: {e}",
            )))
        })?;

    runtime.block_on(run_agent(config)).map_err(|e| {
        tracing::error!("{e}");
        cli::Failure::from(())
    })
}

async fn run_agent(config: config::Config) -> anyhow::Result<()> {
    let _lock = InstanceLock::acquire(&config.lock_path)
        .await
        .map_err(anyhow::Error::from)?;

    let config = Arc::new(config);
    let store = RecordStore::new(&config.state_dir);
    let driver = TranscoderDriver::new(&config.ffmpeg_path);
    let control_plane = Arc::new(ControlPlaneClient::new(ClientConfig {
        base_url: config.base_url.clone(),
        ground_id: config.ground_id.clone(),
        retry_interval: config.sse_retry_interval,
        max_retries: config.sse_max_retries,
    }));

    let (supervisor, exited_rx) = Supervisor::new(
        Arc::clone(&config),
        store,
        driver,
        Arc::clone(&control_plane),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    lifecycle::install_signal_handlers(shutdown_tx);

    let (events_tx, events_rx) = mpsc::channel(256);

    let subscription = {
        let control_plane = Arc::clone(&control_plane);
        tokio::spawn(async move {
            if let Err(e) = control_plane.run(events_tx).await {
                tracing::error!("control-plane subscription ended: {e}");
            }
        })
    };

    let result = supervisor.run(events_rx, exited_rx, shutdown_rx).await;
    subscription.abort();
    result
}

/// Interprets given [panic payload][1] as a displayable message.
///
/// [1]: std::panic::PanicInfo::payload
#[must_use]
pub fn display_panic<'a>(err: &'a (dyn Any + Send + 'static)) -> &'a str {
    if let Some(s) = err.downcast_ref::<&str>() {
        return s;
    }
    if let Some(s) = err.downcast_ref::<String>() {
        return s.as_str();
    }
    "Box<Any>"
}
