use tracing::{debug, warn};

/// Prefix carried by every payload line.
pub const DATA_PREFIX: &str = "data: ";

/// Reserved end-of-stream line.
pub const DONE_SENTINEL: &str = "data: [DONE]";

/// One decoded unit of the byte stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The `data: [DONE]` sentinel.
    Done,
    /// A parsed JSON payload line.
    Json(serde_json::Value),
}

/// Incremental line decoder for `data: <json>` streams.
///
/// Chunks may split lines (and UTF-8 sequences) at any byte; the unterminated
/// tail of each chunk is carried over until a later chunk completes it.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Appends a chunk and returns every frame completed by it.
    ///
    /// Malformed lines are logged and skipped; this never fails.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
            let line_bytes: Vec<u8> = self.buf.drain(..=idx).collect();
            let line = String::from_utf8_lossy(&line_bytes[..idx]);
            if let Some(frame) = decode_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Number of carried-over bytes not yet terminated by a newline.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Releases the carry-over buffer at end of stream.
    ///
    /// An unterminated trailing fragment is never decoded; its size is
    /// returned so the caller can report it.
    pub fn finish(&mut self) -> usize {
        let leftover = self.buf.len();
        if leftover > 0 {
            warn!(
                bytes = leftover,
                "discarding unterminated trailing fragment at end of stream"
            );
        }
        self.buf.clear();
        leftover
    }
}

/// Decodes one complete line.
///
/// Returns `None` for blank lines, non-`data:` lines and lines whose payload
/// is not valid JSON.
pub fn decode_line(raw: &str) -> Option<Frame> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }
    if line == DONE_SENTINEL {
        return Some(Frame::Done);
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        debug!(line, "skipping non-data line");
        return None;
    };
    // Some producers wrap a frame twice.
    let payload = payload.strip_prefix(DATA_PREFIX).unwrap_or(payload);
    match serde_json::from_str(payload) {
        Ok(value) => Some(Frame::Json(value)),
        Err(err) => {
            warn!(error = %err, payload, "skipping malformed data line");
            None
        }
    }
}
