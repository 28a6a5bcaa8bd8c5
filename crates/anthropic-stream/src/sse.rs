//! SSE framing and field parsing.
//!
//! [`FrameExtractor`] only looks for blank-line delimiters in raw bytes.
//! [`SseEvent::parse`] turns one frame's text into its `event:`/`data:` fields.

use bytes::{Bytes, BytesMut};

/// Longest delimiter minus one; a delimiter may straddle two pushes by this
/// many bytes.
const DELIMITER_OVERLAP: usize = 3;

/// Splits a byte stream into SSE frames on `\n\n` or `\r\n\r\n`.
#[derive(Debug, Default)]
pub struct FrameExtractor {
    buf: BytesMut,
    /// Bytes already searched without finding a delimiter.
    scanned: usize,
}

impl FrameExtractor {
    /// Appends bytes in arrival order.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Removes and returns the next complete frame, without its delimiter.
    ///
    /// Returns `None` when no delimiter is buffered yet. A frame may be empty
    /// when two delimiters follow each other.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let from = self.scanned.saturating_sub(DELIMITER_OVERLAP);
        let Some((idx, delim_len)) = find_frame_delimiter(&self.buf, from) else {
            self.scanned = self.buf.len();
            return None;
        };
        let mut frame = self.buf.split_to(idx + delim_len);
        frame.truncate(idx);
        self.scanned = 0;
        Some(frame.freeze())
    }

    /// Collects every complete frame currently buffered.
    pub fn drain_frames(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    /// Bytes held back waiting for a delimiter.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

/// Finds the earliest delimiter at or after `from`. CRLF framing is checked
/// first at each position.
fn find_frame_delimiter(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 1 < buf.len() {
        if buf[i..].starts_with(b"\r\n\r\n") {
            return Some((i, 4));
        }
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        i += 1;
    }
    None
}

/// Fields of one SSE event block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// Value of the last `event:` line.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`; `None` when the block had no data line.
    pub data: Option<String>,
}

impl SseEvent {
    /// Parses the lines of one frame. `id:`, `retry:`, comments and unknown
    /// fields are ignored.
    pub fn parse(text: &str) -> Self {
        let mut event: Option<String> = None;
        let mut data_lines: Vec<&str> = Vec::new();
        for raw_line in text.split('\n') {
            let line = raw_line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => event = Some(value.to_string()),
                "data" => data_lines.push(value),
                _ => {}
            }
        }
        Self {
            event,
            data: if data_lines.is_empty() {
                None
            } else {
                Some(data_lines.join("\n"))
            },
        }
    }

    /// True when the block carries no data worth decoding.
    pub fn is_blank(&self) -> bool {
        self.data.as_deref().is_none_or(|data| data.trim().is_empty())
    }
}
