//! Minimal Server-Sent Events frame parser.
//!
//! No SSE consumer exists anywhere upstream in this workspace's lineage to
//! ground against, so this follows the wire protocol directly: `data:` and
//! `event:` lines accumulate into a pending frame until a blank line
//! terminates it.

/// One parsed SSE frame: the concatenation of its `data:` lines and,
/// separately, its `event:` line if present.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// The frame's `event:` field, if given.
    pub event: Option<String>,
    /// The frame's `data:` field, lines joined by `\n` per the SSE spec.
    pub data: String,
}

/// Incremental parser fed raw bytes as they arrive off the HTTP body and
/// yielding complete [`SseFrame`]s.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    pending_event: Option<String>,
    pending_data: Vec<String>,
}

impl SseDecoder {
    /// Builds an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of bytes (as received from the HTTP body stream),
    /// returning every complete frame the chunk completed.
    ///
    /// Malformed UTF-8 is not expected from a JSON-over-SSE producer and
    /// is replaced lossily rather than treated as fatal.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_owned();
            self.buffer.drain(..=pos);
            self.consume_line(&line, &mut frames);
        }
        frames
    }

    fn consume_line(&mut self, line: &str, frames: &mut Vec<SseFrame>) {
        if line.is_empty() {
            if !self.pending_data.is_empty() || self.pending_event.is_some() {
                frames.push(SseFrame {
                    event: self.pending_event.take(),
                    data: self.pending_data.join("\n"),
                });
                self.pending_data.clear();
            }
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            self.pending_data.push(value.trim_start().to_owned());
        } else if let Some(value) = line.strip_prefix("event:") {
            self.pending_event = Some(value.trim_start().to_owned());
        }
        // Other SSE fields (`id:`, `retry:`, comments starting with `:`)
        // are not meaningful to this consumer and are ignored.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_data_only_frame() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: {\"action\":\"start\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, r#"{"action":"start"}"#);
        assert_eq!(frames[0].event, None);
    }

    #[test]
    fn parses_event_and_multiline_data() {
        let mut decoder = SseDecoder::new();
        let frames = decoder
            .feed(b"event: intent\ndata: line one\ndata: line two\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("intent"));
        assert_eq!(frames[0].data, "line one\nline two");
    }

    #[test]
    fn handles_frame_split_across_feeds() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"acti").is_empty());
        let frames = decoder.feed(b"on\":\"start\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, r#"{"action":"start"}"#);
    }

    #[test]
    fn two_frames_in_one_feed_both_parsed() {
        let mut decoder = SseDecoder::new();
        let frames =
            decoder.feed(b"data: first\n\ndata: second\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "first");
        assert_eq!(frames[1].data, "second");
    }

    #[test]
    fn ignores_comment_and_unknown_fields() {
        let mut decoder = SseDecoder::new();
        let frames =
            decoder.feed(b": keep-alive\nretry: 3000\ndata: x\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
    }
}
