//! Stall detection over a transcoder's progress output (§4.2).

use once_cell::sync::Lazy;
use regex::Regex;

/// Default pattern matching FFmpeg's `time=HH:MM:SS.ff` progress token.
///
/// Configurable per §9 Design Notes ("implementers should make the count
/// and the parser regex configurable while preserving the default
/// behavior").
pub(crate) static DEFAULT_PROGRESS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"time=(\d{2}:\d{2}:\d{2}\.\d+)").unwrap());

/// Default number of consecutive identical progress samples that
/// constitute a stall.
pub const DEFAULT_STALL_THRESHOLD: u32 = 10;

/// Tracks the last observed progress timestamp and how many consecutive
/// times it has repeated, firing once the configured threshold is hit.
#[derive(Debug)]
pub struct StallDetector {
    pattern: Regex,
    threshold: u32,
    last_sample: Option<String>,
    repeat_count: u32,
}

impl StallDetector {
    /// Builds a detector using the default progress pattern and
    /// threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::with_pattern(
            DEFAULT_PROGRESS_PATTERN.clone(),
            DEFAULT_STALL_THRESHOLD,
        )
    }

    /// Builds a detector with a caller-supplied pattern and threshold.
    #[must_use]
    pub fn with_pattern(pattern: Regex, threshold: u32) -> Self {
        Self {
            pattern,
            threshold,
            last_sample: None,
            repeat_count: 0,
        }
    }

    /// Feeds one line of stderr output. Returns `true` exactly when the
    /// progress timestamp it contains (if any) has now repeated
    /// `threshold` times consecutively.
    pub fn observe_line(&mut self, line: &str) -> bool {
        let Some(captures) = self.pattern.captures(line) else {
            return false;
        };
        let sample = captures[1].to_owned();

        if self.last_sample.as_deref() == Some(sample.as_str()) {
            self.repeat_count += 1;
        } else {
            self.last_sample = Some(sample);
            self.repeat_count = 1;
        }

        self.repeat_count >= self.threshold
    }
}

impl Default for StallDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_exactly_on_tenth_repeat() {
        let mut detector = StallDetector::new();
        for i in 1..DEFAULT_STALL_THRESHOLD {
            assert!(
                !detector.observe_line("frame=1 time=00:00:03.00 bitrate=1"),
                "fired early on repeat {i}",
            );
        }
        assert!(detector.observe_line("frame=1 time=00:00:03.00 bitrate=1"));
    }

    #[test]
    fn resets_on_progress() {
        let mut detector = StallDetector::new();
        for _ in 1..DEFAULT_STALL_THRESHOLD {
            assert!(!detector.observe_line("time=00:00:03.00"));
        }
        assert!(!detector.observe_line("time=00:00:04.00"));
        for _ in 1..DEFAULT_STALL_THRESHOLD {
            assert!(!detector.observe_line("time=00:00:04.00"));
        }
        assert!(detector.observe_line("time=00:00:04.00"));
    }

    #[test]
    fn ignores_lines_without_progress_token() {
        let mut detector = StallDetector::new();
        for _ in 0..20 {
            assert!(!detector.observe_line("Stream mapping:"));
        }
    }
}
