//! Audio-probe step backing `Transcoder Driver::detectAudio` (§4.2).

use std::{process::Stdio, time::Duration};

use courtstream_log::tracing;
use serde::Deserialize;
use tokio::process::Command;

const READ_SECONDS: u64 = 5;
const WALL_CLOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
}

/// Probes `camera_url` with `ffprobe`, bounding the read to
/// [`READ_SECONDS`] and the whole call to [`WALL_CLOCK_TIMEOUT`].
///
/// Returns whether at least one audio stream is advertised. Never returns
/// `Ok(true)` on a timeout or any probe error — both collapse to `false`,
/// per the "must never return true on timeout or error" rule in §4.2.
pub async fn detect_audio(ffprobe_path: &std::path::Path, camera_url: &str) -> bool {
    match tokio::time::timeout(
        WALL_CLOCK_TIMEOUT,
        run_ffprobe(ffprobe_path, camera_url),
    )
    .await
    {
        Ok(Ok(has_audio)) => has_audio,
        Ok(Err(e)) => {
            tracing::warn!("audio probe failed for {camera_url}: {e}");
            false
        }
        Err(_) => {
            tracing::warn!("audio probe timed out for {camera_url}");
            false
        }
    }
}

async fn run_ffprobe(
    ffprobe_path: &std::path::Path,
    camera_url: &str,
) -> anyhow::Result<bool> {
    let out = Command::new(ffprobe_path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .args([
            "-v",
            "quiet",
            "-read_intervals",
            &format!("%+{READ_SECONDS}"),
            "-show_entries",
            "stream=codec_type",
            "-of",
            "json",
        ])
        .arg(camera_url)
        .output()
        .await?;

    if !out.status.success() {
        anyhow::bail!(
            "ffprobe exited with {}: {}",
            out.status,
            String::from_utf8_lossy(&out.stderr),
        );
    }

    let parsed: ProbeOutput = serde_json::from_slice(&out.stdout)?;
    Ok(parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_output_parses_audio_stream() {
        let json = br#"{"streams":[{"codec_type":"video"},{"codec_type":"audio"}]}"#;
        let parsed: ProbeOutput = serde_json::from_slice(json).unwrap();
        assert!(parsed.streams.iter().any(|s| s.codec_type.as_deref() == Some("audio")));
    }

    #[test]
    fn probe_output_parses_video_only() {
        let json = br#"{"streams":[{"codec_type":"video"}]}"#;
        let parsed: ProbeOutput = serde_json::from_slice(json).unwrap();
        assert!(!parsed.streams.iter().any(|s| s.codec_type.as_deref() == Some("audio")));
    }
}
