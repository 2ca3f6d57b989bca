//! CLI (command line interface).

use std::{fmt, path::PathBuf, str::FromStr as _, time::Duration};

use clap::Parser;
use courtstream_log::{tracing, LogFormat};
use url::Url;

/// CLI (command line interface) of the edge stream supervisor.
#[derive(Clone, Debug, Parser)]
#[command(about = "Edge stream supervisor for RTSP to RTMP transcoding")]
pub struct Opts {
    /// Control-plane HTTP base, e.g. `https://control.example.com`.
    #[arg(
        long,
        env = "STREAM_AGENT_BASE_URL",
        help = "Control-plane HTTP base URL"
    )]
    pub base_url: Url,

    /// Identity of this agent; used in control-plane URL paths.
    #[arg(
        long,
        env = "STREAM_AGENT_GROUND_ID",
        help = "Identity of this agent in control-plane URL paths"
    )]
    pub ground_id: String,

    /// Path to a per-deployment overlay image, top-right corner.
    #[arg(
        long,
        env = "STREAM_AGENT_CLIENT_LOGO_PATH",
        help = "Path to the per-deployment overlay image"
    )]
    pub client_logo_path: PathBuf,

    /// Path to the agent-wide overlay image, bottom-right corner.
    #[arg(
        long,
        env = "STREAM_AGENT_PRIMARY_LOGO_PATH",
        default_value = "/etc/courtstream/primary-logo.png",
        help = "Path to the agent-wide overlay image"
    )]
    pub primary_logo_path: PathBuf,

    /// Path to the FFmpeg binary.
    #[arg(
        long,
        env = "FFMPEG_PATH",
        default_value = "/usr/local/bin/ffmpeg",
        help = "Path to FFmpeg binary"
    )]
    pub ffmpeg_path: PathBuf,

    /// Path to the ffprobe binary, used by the audio probe.
    #[arg(
        long,
        env = "FFPROBE_PATH",
        default_value = "/usr/local/bin/ffprobe",
        help = "Path to ffprobe binary"
    )]
    pub ffprobe_path: PathBuf,

    /// Path to a directory to persist stream records in.
    #[arg(
        long,
        env = "STREAM_AGENT_STATE_DIR",
        default_value = "/var/lib/courtstream-agent/state",
        help = "Directory to persist stream records in"
    )]
    pub state_dir: PathBuf,

    /// Path to the single-instance advisory lock file.
    #[arg(
        long,
        env = "STREAM_AGENT_LOCK_PATH",
        default_value = "/var/run/courtstream-agent.lock",
        help = "Path to the single-instance advisory lock file"
    )]
    pub lock_path: PathBuf,

    /// Base delay of the SSE reconnect backoff, in milliseconds.
    #[arg(
        long,
        env = "STREAM_AGENT_SSE_RETRY_INTERVAL_MS",
        default_value = "1000",
        value_parser = parse_millis,
        help = "Base delay of SSE reconnect backoff, in milliseconds"
    )]
    pub sse_retry_interval: Duration,

    /// Cap on SSE reconnect attempts before permanent failure.
    #[arg(
        long,
        env = "STREAM_AGENT_SSE_MAX_RETRIES",
        default_value = "10",
        help = "Cap on SSE reconnect attempts before permanent failure"
    )]
    pub sse_max_retries: u32,

    /// Period of the supervisor's health tick, in milliseconds.
    #[arg(
        long,
        env = "STREAM_AGENT_HEALTH_CHECK_INTERVAL_MS",
        default_value = "5000",
        value_parser = parse_millis,
        help = "Period of the health tick, in milliseconds"
    )]
    pub health_check_interval: Duration,

    /// Target video width for the scale filter.
    #[arg(long, env = "STREAM_AGENT_VIDEO_WIDTH", default_value = "1920")]
    pub video_width: u32,

    /// Target video height for the scale filter.
    #[arg(long, env = "STREAM_AGENT_VIDEO_HEIGHT", default_value = "1080")]
    pub video_height: u32,

    /// `-b:v` in kbps.
    #[arg(long, env = "STREAM_AGENT_VIDEO_BITRATE_KBPS", default_value = "4500")]
    pub video_bitrate_kbps: u32,

    /// `-maxrate` in kbps.
    #[arg(long, env = "STREAM_AGENT_VIDEO_MAXRATE_KBPS", default_value = "5000")]
    pub video_maxrate_kbps: u32,

    /// `-bufsize` in kbps.
    #[arg(long, env = "STREAM_AGENT_VIDEO_BUFSIZE_KBPS", default_value = "10000")]
    pub video_bufsize_kbps: u32,

    /// RTMP base the stream key is appended to.
    #[arg(
        long,
        env = "STREAM_AGENT_RTMP_BASE",
        default_value = "rtmp://a.rtmp.youtube.com/live2",
        help = "RTMP base URL the stream key is appended to"
    )]
    pub rtmp_base: Url,

    /// Verbosity level of the agent's own logs.
    #[arg(
        short,
        long,
        env = "STREAM_AGENT_LOG_LEVEL",
        value_parser(tracing::Level::from_str),
        help = "Logs verbosity level: INFO | DEBUG | TRACE"
    )]
    pub verbose: Option<tracing::Level>,

    /// Optional path to additionally mirror local logs into.
    #[arg(long, env = "STREAM_AGENT_LOG_FILE", help = "Path to mirror logs into")]
    pub log_file: Option<PathBuf>,

    /// Local log output format.
    #[arg(
        long,
        env = "STREAM_AGENT_LOG_FORMAT",
        help = "Logs format: JSON | COMPACT"
    )]
    pub log_format: Option<LogFormat>,

    /// Whether remote batch log shipping is enabled.
    #[arg(long, env = "STREAM_AGENT_REMOTE_LOGGING_ENABLED")]
    pub remote_logging_enabled: bool,

    /// Endpoint remote log batches are POSTed to.
    #[arg(long, env = "STREAM_AGENT_REMOTE_LOGGING_ENDPOINT")]
    pub remote_logging_endpoint: Option<Url>,

    /// Max records per flushed remote-logging batch.
    #[arg(
        long,
        env = "STREAM_AGENT_REMOTE_LOGGING_BATCH_SIZE",
        default_value = "100"
    )]
    pub remote_logging_batch_size: usize,

    /// Max time to wait before flushing an under-sized batch, in
    /// milliseconds.
    #[arg(
        long,
        env = "STREAM_AGENT_REMOTE_LOGGING_BATCH_INTERVAL_MS",
        default_value = "5000",
        value_parser = parse_millis
    )]
    pub remote_logging_batch_interval: Duration,

    /// Upper bound on records held in memory awaiting shipment.
    #[arg(
        long,
        env = "STREAM_AGENT_REMOTE_LOGGING_MAX_MEMORY_USAGE",
        default_value = "10000"
    )]
    pub remote_logging_max_memory_usage: usize,

    /// Retry attempts for a batch that fails to ship.
    #[arg(
        long,
        env = "STREAM_AGENT_REMOTE_LOGGING_RETRY_ATTEMPTS",
        default_value = "3"
    )]
    pub remote_logging_retry_attempts: u32,

    /// Delay between consecutive retry attempts, in milliseconds.
    #[arg(
        long,
        env = "STREAM_AGENT_REMOTE_LOGGING_RETRY_DELAY_MS",
        default_value = "1000",
        value_parser = parse_millis
    )]
    pub remote_logging_retry_delay: Duration,
}

fn parse_millis(s: &str) -> Result<Duration, String> {
    s.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| e.to_string())
}

impl Opts {
    /// Parses CLI [`Opts`] from command line arguments.
    ///
    /// Prints the error message and quits the program in case of failure.
    #[inline]
    #[must_use]
    pub fn from_args() -> Self {
        <Self as Parser>::parse()
    }
}

/// Error type indicating non-zero process exit code.
pub struct Failure;

impl fmt::Debug for Failure {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "")
    }
}

impl From<()> for Failure {
    #[inline]
    fn from(_: ()) -> Self {
        Self
    }
}

impl From<crate::error::Fatal> for Failure {
    #[inline]
    fn from(err: crate::error::Fatal) -> Self {
        tracing::error!("{err}");
        Self
    }
}
