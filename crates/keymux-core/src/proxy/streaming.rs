//! Server-sent-event relay framing.
//!
//! The upstream body arrives in arbitrary byte chunks; clients need whole
//! lines separated by blank lines, flushed per event. The framer splits
//! chunks into lines, drops blank keep-alive lines, and restores the
//! `line\n\n` framing on the way out.

use bytes::{Bytes, BytesMut};

/// The upstream's terminal sentinel on the OpenAI-compatible stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Incremental line splitter over an SSE byte stream.
#[derive(Default)]
pub struct LineFramer {
    buffer: BytesMut,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one upstream chunk; returns every complete, non-blank line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw = self.buffer.split_to(pos + 1);
            if let Some(line) = decode_line(&raw) {
                lines.push(line);
            }
        }
        lines
    }

    /// Flush whatever remains after upstream EOF (a final unterminated line).
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = self.buffer.split();
        decode_line(&raw)
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim_end_matches(['\n', '\r']);
    if line.trim().is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

/// Re-frame one relayed line as an SSE event.
pub fn event_frame(line: &str) -> Bytes {
    Bytes::from(format!("{line}\n\n"))
}

/// Inline error frame for failures after the stream has started.
pub fn error_frame(message: &str) -> Bytes {
    let body = serde_json::json!({
        "error": { "message": message, "type": "api_error" }
    });
    Bytes::from(format!("data: {body}\n\n"))
}

pub fn is_done(line: &str) -> bool {
    line.ends_with(DONE_SENTINEL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_split_across_chunks() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"data: {\"par").is_empty());
        let lines = framer.push(b"tial\":1}\ndata: next\n");
        assert_eq!(lines, vec!["data: {\"partial\":1}", "data: next"]);
    }

    #[test]
    fn test_blank_lines_dropped() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"data: a\n\n\r\ndata: b\n");
        assert_eq!(lines, vec!["data: a", "data: b"]);
    }

    #[test]
    fn test_crlf_trimmed() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"data: a\r\n");
        assert_eq!(lines, vec!["data: a"]);
    }

    #[test]
    fn test_finish_flushes_trailing_line() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"data: tail").is_empty());
        assert_eq!(framer.finish().as_deref(), Some("data: tail"));
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn test_done_detection() {
        assert!(is_done("data: [DONE]"));
        assert!(!is_done("data: {\"choices\":[]}"));
    }

    #[test]
    fn test_event_frame_restores_separator() {
        assert_eq!(event_frame("data: x"), Bytes::from("data: x\n\n"));
    }
}
