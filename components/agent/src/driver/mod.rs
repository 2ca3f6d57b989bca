//! Spawns, observes, and terminates transcoder processes (§4.2).

pub mod probe;
mod stall;

use std::{
    collections::HashMap,
    process::Stdio,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use courtstream_log::tracing;
use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use tokio::{
    io::{AsyncBufReadExt as _, BufReader},
    process::{Child, Command},
    sync::mpsc,
};

pub use self::probe::detect_audio;
use self::stall::StallDetector;
use crate::{
    config::TranscodeDefaults,
    error::StartupError,
    record::{CourtId, StreamId, StreamKey},
};

const STARTUP_DEADLINE: Duration = Duration::from_secs(10);
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);
const STOP_OVERALL_TIMEOUT: Duration = Duration::from_secs(10);

const STARTUP_READY_MARKERS: &[&str] =
    &["Stream mapping:", "press [q] to stop"];
const STARTUP_ERROR_MARKERS: &[&str] = &[
    "Connection refused",
    "No route to host",
    "Invalid data found",
];

/// The original intent behind a spawned transcoder, carried through so the
/// supervisor can re-evaluate it once the process exits (§4.2 "invokes
/// `retryBinding.onRetry(originalRequest)`").
#[derive(Clone, Debug)]
pub struct StartRequest {
    /// Stream record this process was spawned for.
    pub record_id: StreamId,
    /// Input source URL.
    pub camera_url: String,
    /// Destination credential.
    pub stream_key: StreamKey,
    /// Logical court grouping.
    pub court_id: CourtId,
    /// Whether the input was found to carry an audio stream.
    pub has_audio: bool,
}

/// In-memory handle to a transcoder this driver spawned (§3 Transcoder
/// Handle).
#[derive(Clone, Debug)]
pub struct TranscoderHandle {
    /// OS process id.
    pub pid: u32,
    /// Full command line the child was spawned with.
    pub command_line: Vec<String>,
    /// When the child was spawned.
    pub started_at: DateTime<Utc>,
}

/// Notification sent back to the supervisor when a spawned child exits,
/// for any reason, including a requested stop (§4.2, §9 Design Notes).
#[derive(Debug)]
pub struct ProcessExited {
    /// The request the exited process was serving.
    pub request: StartRequest,
    /// Process id of the child that exited.
    pub pid: u32,
}

/// Owns spawning and observation of transcoder processes.
///
/// One driver instance is shared by the whole agent; its in-memory table
/// is the authoritative set of processes it has spawned (§5 "the driver's
/// in-memory process table: written only by the driver's own tasks").
#[derive(Clone, Debug)]
pub struct TranscoderDriver {
    ffmpeg_path: std::path::PathBuf,
    handles: Arc<Mutex<HashMap<u32, TranscoderHandle>>>,
}

impl TranscoderDriver {
    /// Builds a driver that will spawn `ffmpeg_path` for every stream.
    #[must_use]
    pub fn new(ffmpeg_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawns a transcoder for `request`, blocking until the child reports
    /// readiness or the startup deadline elapses.
    ///
    /// On success, spawns a background task that watches stderr for stall
    /// and error markers and reports the exit (of any kind) to
    /// `on_exit`, per §4.2's unconditional retry-binding callback.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] if the asset check, spawn, or startup
    /// handshake fails.
    pub async fn start_stream(
        &self,
        request: StartRequest,
        defaults: &TranscodeDefaults,
        on_exit: mpsc::Sender<ProcessExited>,
    ) -> Result<TranscoderHandle, StartupError> {
        for path in [&defaults.primary_logo_path, &defaults.client_logo_path]
        {
            if !path.exists() {
                return Err(StartupError::MissingAsset(path.clone()));
            }
        }

        let argv = build_argv(&request, defaults);
        tracing::info!(
            record_id = %request.record_id,
            argv = ?argv,
            "spawning transcoder",
        );

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(StartupError::Spawn)?;
        let pid = child
            .id()
            .expect("just-spawned child always has a pid");
        let started_at = Utc::now();

        let stderr = child.stderr.take().expect("stderr was piped");
        let mut lines = BufReader::new(stderr).lines();

        let deadline = tokio::time::sleep(STARTUP_DEADLINE);
        tokio::pin!(deadline);

        let handshake_result = loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            tracing::debug!(target: "transcoder", "{line}");
                            if STARTUP_READY_MARKERS.iter().any(|m| line.contains(*m)) {
                                break Ok(());
                            }
                            if let Some(marker) = STARTUP_ERROR_MARKERS
                                .iter()
                                .copied()
                                .find(|m| line.contains(*m))
                            {
                                break Err(StartupError::StartupFailure(marker.to_owned()));
                            }
                        }
                        Ok(None) => {
                            let status = child.wait().await;
                            break Err(StartupError::StartupFailure(format!(
                                "transcoder exited before reporting readiness: {status:?}",
                            )));
                        }
                        Err(e) => {
                            break Err(StartupError::StartupFailure(format!(
                                "error reading transcoder stderr: {e}",
                            )));
                        }
                    }
                }
                () = &mut deadline => {
                    break Err(StartupError::StartupTimeout);
                }
            }
        };

        if let Err(e) = handshake_result {
            let _ = child.kill().await;
            return Err(e);
        }

        let handle = TranscoderHandle {
            pid,
            command_line: argv,
            started_at,
        };
        self.handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(pid, handle.clone());

        let driver = self.clone();
        tokio::spawn(async move {
            driver.observe(child, lines, pid, request, on_exit).await;
        });

        Ok(handle)
    }

    /// Sends a graceful termination to `pid`; escalates to a hard kill
    /// after the grace period; gives up bookkeeping after the overall
    /// timeout. Safe to call for an unknown pid (§4.2).
    pub async fn stop_stream(&self, pid: u32) {
        {
            let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
            handles.remove(&pid);
        }

        if !Self::is_process_running(pid) {
            return;
        }

        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::warn!("failed to send SIGTERM to {pid}: {e}");
        }

        let deadline = tokio::time::Instant::now() + STOP_OVERALL_TIMEOUT;
        tokio::time::sleep(STOP_GRACE_PERIOD).await;

        if !Self::is_process_running(pid) {
            return;
        }

        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            tracing::warn!("failed to send SIGKILL to {pid}: {e}");
        }

        while Self::is_process_running(pid) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Base name of the transcoder binary this driver spawns, e.g.
    /// `ffmpeg`, for use by the orphan sweeper's process-name matching.
    #[must_use]
    pub fn binary_name(&self) -> String {
        self.ffmpeg_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.ffmpeg_path.display().to_string())
    }

    /// Returns whether a process with `pid` currently exists.
    #[must_use]
    pub fn is_process_running(pid: u32) -> bool {
        kill(Pid::from_raw(pid as i32), None::<Signal>).is_ok()
    }

    /// Returns a snapshot of every process this driver has spawned and not
    /// yet observed exiting.
    #[must_use]
    pub fn running_processes(&self) -> Vec<TranscoderHandle> {
        self.handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Terminates every process this driver currently tracks.
    pub async fn kill_all_processes(&self) {
        let pids: Vec<u32> =
            self.handles.lock().unwrap_or_else(|p| p.into_inner()).keys().copied().collect();
        for pid in pids {
            self.stop_stream(pid).await;
        }
    }

    /// Watches an already-running child for stalls and exit, after the
    /// startup handshake in [`Self::start_stream`] has already succeeded.
    async fn observe(
        &self,
        mut child: Child,
        mut lines: tokio::io::Lines<BufReader<tokio::process::ChildStderr>>,
        pid: u32,
        request: StartRequest,
        on_exit: mpsc::Sender<ProcessExited>,
    ) {
        let mut stall_detector = StallDetector::new();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            tracing::debug!(target: "transcoder", "{line}");
                            if stall_detector.observe_line(&line) {
                                tracing::warn!(
                                    record_id = %request.record_id,
                                    "stall detected, hard-killing transcoder",
                                );
                                let _ = child.kill().await;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!("error reading transcoder stderr: {e}");
                        }
                    }
                }
                status = child.wait() => {
                    tracing::info!(
                        record_id = %request.record_id,
                        status = ?status,
                        "transcoder exited",
                    );
                    break;
                }
            }
        }

        self.handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&pid);
        let _ = on_exit.send(ProcessExited { request, pid }).await;
    }
}

/// Builds the FFmpeg argument vector per the behavioral contract of §6.
/// Order matters: this function is a faithful transcription of the
/// contract, not a reordering for convenience.
#[must_use]
pub fn build_argv(
    request: &StartRequest,
    defaults: &TranscodeDefaults,
) -> Vec<String> {
    let mut argv = Vec::new();

    argv.extend(["-rtsp_transport".into(), "tcp".into()]);
    argv.extend(["-i".into(), request.camera_url.clone()]);

    // WARNING: input order matters here. The camera is always input 0; the
    // silent-audio input (if any) is inserted before the logos, so the
    // logo indices the filter references below must shift with it.
    if !request.has_audio {
        argv.extend([
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            "anullsrc=channel_layout=stereo:sample_rate=44100".into(),
        ]);
    }
    let primary_logo_in = if request.has_audio { 1 } else { 2 };
    let client_logo_in = primary_logo_in + 1;

    argv.extend([
        "-i".into(),
        defaults.primary_logo_path.display().to_string(),
        "-i".into(),
        defaults.client_logo_path.display().to_string(),
    ]);

    let (width, height) = defaults.resolution;
    let filter = format!(
        "[{primary_logo_in}:v]scale=500:-1:force_original_aspect_ratio=decrease[primary];\
         [{client_logo_in}:v]scale=350:-1:force_original_aspect_ratio=decrease[client];\
         [0:v]scale={width}:{height}[scaled];\
         [scaled][primary]overlay=W-w-10:H-h-10[withprimary];\
         [withprimary][client]overlay=W-w-10:10",
    );
    argv.extend(["-filter_complex".into(), filter]);

    argv.extend([
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-b:v".into(),
        format!("{}k", defaults.video_bitrate_kbps),
        "-maxrate".into(),
        format!("{}k", defaults.video_maxrate_kbps),
        "-bufsize".into(),
        format!("{}k", defaults.video_bufsize_kbps),
    ]);

    argv.extend([
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "128k".into(),
        "-ar".into(),
        "44100".into(),
        "-ac".into(),
        "2".into(),
        "-shortest".into(),
    ]);

    let mut rtmp_base = defaults.rtmp_base.clone();
    {
        let mut segments = rtmp_base
            .path_segments_mut()
            .expect("rtmp base must be a base URL");
        segments.push(&request.stream_key.0);
    }

    argv.extend(["-f".into(), "flv".into(), rtmp_base.to_string()]);

    argv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CourtId, StreamId};

    fn sample_request(has_audio: bool) -> StartRequest {
        StartRequest {
            record_id: StreamId::generate(Utc::now()),
            camera_url: "rtsp://cam/1".into(),
            stream_key: StreamKey("K".into()),
            court_id: CourtId("C1".into()),
            has_audio,
        }
    }

    fn sample_defaults() -> TranscodeDefaults {
        TranscodeDefaults {
            primary_logo_path: "/etc/courtstream/primary-logo.png".into(),
            client_logo_path: "/etc/courtstream/client-logo.png".into(),
            resolution: (1920, 1080),
            video_bitrate_kbps: 4500,
            video_maxrate_kbps: 5000,
            video_bufsize_kbps: 10000,
            rtmp_base: "rtmp://a.rtmp.youtube.com/live2".parse().unwrap(),
        }
    }

    #[test]
    fn argv_omits_silent_audio_when_has_audio() {
        let argv = build_argv(&sample_request(true), &sample_defaults());
        assert!(!argv.iter().any(|a| a == "anullsrc=channel_layout=stereo:sample_rate=44100"));
    }

    #[test]
    fn argv_injects_silent_audio_when_no_audio() {
        let argv = build_argv(&sample_request(false), &sample_defaults());
        assert!(argv.iter().any(|a| a.starts_with("anullsrc=")));
    }

    fn filter_complex(argv: &[String]) -> &str {
        let pos = argv
            .iter()
            .position(|a| a == "-filter_complex")
            .expect("filter_complex flag present");
        &argv[pos + 1]
    }

    #[test]
    fn filter_complex_uses_logo_inputs_1_and_2_when_has_audio() {
        let argv = build_argv(&sample_request(true), &sample_defaults());
        let filter = filter_complex(&argv);
        assert!(filter.starts_with("[1:v]"));
        assert!(filter.contains("[2:v]"));
        assert!(!filter.contains("[3:v]"));
    }

    #[test]
    fn filter_complex_uses_logo_inputs_2_and_3_when_no_audio() {
        let argv = build_argv(&sample_request(false), &sample_defaults());
        let filter = filter_complex(&argv);
        assert!(filter.starts_with("[2:v]"));
        assert!(filter.contains("[3:v]"));
        assert!(!filter.contains("[1:v]"));
    }

    #[test]
    fn argv_ends_with_flv_output_with_stream_key() {
        let argv = build_argv(&sample_request(true), &sample_defaults());
        assert_eq!(argv[argv.len() - 3], "-f");
        assert_eq!(argv[argv.len() - 2], "flv");
        assert!(argv.last().unwrap().ends_with("/K"));
    }

    #[test]
    fn argv_starts_with_rtsp_tcp_transport() {
        let argv = build_argv(&sample_request(true), &sample_defaults());
        assert_eq!(argv[0], "-rtsp_transport");
        assert_eq!(argv[1], "tcp");
        assert_eq!(argv[2], "-i");
        assert_eq!(argv[3], "rtsp://cam/1");
    }
}
