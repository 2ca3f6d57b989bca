//! Immutable configuration resolved once at entry (§9 Design Notes:
//! "replace singleton-style global configuration with a value constructed
//! at entry and passed by parameter").

use std::{path::PathBuf, time::Duration};

use courtstream_log::LogFormat;
use url::Url;

use crate::error::Fatal;

/// Video/overlay defaults matching the argument contract in §6.
#[derive(Clone, Debug)]
pub struct TranscodeDefaults {
    /// Path to the primary (agent-wide) overlay logo.
    pub primary_logo_path: PathBuf,
    /// Path to the per-deployment overlay logo (`clientLogoPath`).
    pub client_logo_path: PathBuf,
    /// Target video resolution, `WIDTHxHEIGHT`.
    pub resolution: (u32, u32),
    /// `-b:v` in kbps.
    pub video_bitrate_kbps: u32,
    /// `-maxrate` in kbps.
    pub video_maxrate_kbps: u32,
    /// `-bufsize` in kbps.
    pub video_bufsize_kbps: u32,
    /// RTMP base the stream key is appended to.
    pub rtmp_base: Url,
}

/// Remote log-shipping configuration, `remoteLogging.*` in §6.
#[derive(Clone, Debug)]
pub struct RemoteLoggingOpts {
    /// Whether shipping is enabled at all.
    pub enabled: bool,
    /// Endpoint records are POSTed to.
    pub endpoint: Option<Url>,
    /// Max records per flushed batch.
    pub batch_size: usize,
    /// Max time to wait before flushing an under-sized batch.
    pub batch_interval: Duration,
    /// In-memory queue bound.
    pub max_memory_usage: usize,
    /// Retry attempts for a failed batch.
    pub retry_attempts: u32,
    /// Delay between retry attempts.
    pub retry_delay: Duration,
}

/// Resolved, immutable configuration for a single agent process.
#[derive(Clone, Debug)]
pub struct Config {
    /// Control-plane HTTP base.
    pub base_url: Url,
    /// Identity of this agent; used in URL paths.
    pub ground_id: String,
    /// Path to the FFmpeg binary.
    pub ffmpeg_path: PathBuf,
    /// Path to the ffprobe binary, used by the audio probe.
    pub ffprobe_path: PathBuf,
    /// Record store root.
    pub state_dir: PathBuf,
    /// Path to the single-instance advisory lock file.
    pub lock_path: PathBuf,
    /// Backoff base for SSE reconnects.
    pub sse_retry_interval: Duration,
    /// Cap on SSE reconnect attempts before permanent failure.
    pub sse_max_retries: u32,
    /// Period of the supervisor's health tick.
    pub health_check_interval: Duration,
    /// Local logging verbosity.
    pub log_level: courtstream_log::Level,
    /// Optional path to mirror local logs into, in addition to stdout.
    pub log_file: Option<PathBuf>,
    /// Local log output format.
    pub log_format: LogFormat,
    /// Optional remote log shipping.
    pub remote_logging: RemoteLoggingOpts,
    /// Transcoder argument-contract defaults.
    pub transcode: TranscodeDefaults,
}

impl Config {
    /// Resolves CLI [`crate::cli::Opts`] into an immutable [`Config`],
    /// validating the required keys called out in §6.
    ///
    /// # Errors
    ///
    /// Returns [`Fatal::Config`] if a required key is missing or
    /// malformed.
    pub fn try_from_opts(opts: crate::cli::Opts) -> Result<Self, Fatal> {
        if opts.ground_id.trim().is_empty() {
            return Err(Fatal::Config("groundId must not be empty".into()));
        }
        if !opts.client_logo_path.exists() {
            return Err(Fatal::Config(format!(
                "clientLogoPath does not exist: {}",
                opts.client_logo_path.display(),
            )));
        }

        let remote_logging = if opts.remote_logging_enabled {
            let endpoint = opts.remote_logging_endpoint.clone().ok_or_else(|| {
                Fatal::Config(
                    "remoteLogging.enabled is true but no endpoint was given"
                        .into(),
                )
            })?;
            RemoteLoggingOpts {
                enabled: true,
                endpoint: Some(endpoint),
                batch_size: opts.remote_logging_batch_size,
                batch_interval: opts.remote_logging_batch_interval,
                max_memory_usage: opts.remote_logging_max_memory_usage,
                retry_attempts: opts.remote_logging_retry_attempts,
                retry_delay: opts.remote_logging_retry_delay,
            }
        } else {
            RemoteLoggingOpts {
                enabled: false,
                endpoint: None,
                batch_size: opts.remote_logging_batch_size,
                batch_interval: opts.remote_logging_batch_interval,
                max_memory_usage: opts.remote_logging_max_memory_usage,
                retry_attempts: opts.remote_logging_retry_attempts,
                retry_delay: opts.remote_logging_retry_delay,
            }
        };

        Ok(Self {
            base_url: opts.base_url,
            ground_id: opts.ground_id,
            ffmpeg_path: opts.ffmpeg_path,
            ffprobe_path: opts.ffprobe_path,
            state_dir: opts.state_dir,
            lock_path: opts.lock_path,
            sse_retry_interval: opts.sse_retry_interval,
            sse_max_retries: opts.sse_max_retries,
            health_check_interval: opts.health_check_interval,
            log_level: opts.verbose.unwrap_or(courtstream_log::Level::INFO),
            log_file: opts.log_file,
            log_format: opts.log_format.unwrap_or_default(),
            remote_logging,
            transcode: TranscodeDefaults {
                primary_logo_path: opts.primary_logo_path,
                client_logo_path: opts.client_logo_path,
                resolution: (opts.video_width, opts.video_height),
                video_bitrate_kbps: opts.video_bitrate_kbps,
                video_maxrate_kbps: opts.video_maxrate_kbps,
                video_bufsize_kbps: opts.video_bufsize_kbps,
                rtmp_base: opts.rtmp_base,
            },
        })
    }
}
