//! Incremental splitter for back-to-back JSON objects in a chunked response body.
//!
//! The inference service writes one JSON object per event with no delimiter or length
//! prefix. Chunk boundaries from the transport fall anywhere, including inside strings and
//! inside multi-byte UTF-8 sequences. The decoder tracks brace depth and string/escape
//! state byte by byte; every structural character is ASCII, so continuation bytes of a
//! UTF-8 sequence never change the state.

use serde_json::Value;

/// Splits a byte stream into complete JSON objects. One decoder per turn.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Offset of the next byte to scan.
    scan: usize,
    /// Offset of the `{` that opened the object currently being read.
    start: Option<usize>,
    depth: usize,
    in_string: bool,
    escaped: bool,
    dropped: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk; returns every object completed by it, in order.
    /// Candidates that are not valid JSON are logged and skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut i = self.scan;
        while i < self.buf.len() {
            let b = self.buf[i];
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
            } else {
                match b {
                    b'{' => {
                        if self.depth == 0 {
                            self.start = Some(i);
                        }
                        self.depth += 1;
                    }
                    b'}' if self.depth > 0 => {
                        self.depth -= 1;
                        if self.depth == 0 {
                            if let Some(start) = self.start.take() {
                                if let Some(frame) = self.parse_candidate(start, i + 1) {
                                    frames.push(frame);
                                }
                            }
                        }
                    }
                    b'"' if self.depth > 0 => self.in_string = true,
                    b if self.depth == 0 && !b.is_ascii_whitespace() => {
                        log::debug!("stream decoder: skipping stray byte 0x{:02x} between frames", b);
                    }
                    _ => {}
                }
            }
            i += 1;
        }
        self.compact();
        frames
    }

    /// End of stream. Returns the number of bytes of an unterminated trailing object that
    /// had to be discarded (0 when the stream ended on a frame boundary).
    pub fn finish(self) -> usize {
        let pending = match self.start {
            Some(start) => self.buf.len() - start,
            None => 0,
        };
        if pending > 0 {
            log::warn!(
                "stream decoder: stream ended inside a frame, dropping {} byte(s)",
                pending
            );
        }
        pending
    }

    /// Number of candidate frames dropped because they did not parse.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn parse_candidate(&mut self, start: usize, end: usize) -> Option<Value> {
        let bytes = &self.buf[start..end];
        match serde_json::from_slice::<Value>(bytes) {
            Ok(v) => Some(v),
            Err(e) => {
                self.dropped += 1;
                log::warn!(
                    "stream decoder: dropping unparseable frame ({}): {}",
                    e,
                    String::from_utf8_lossy(bytes)
                );
                None
            }
        }
    }

    /// Drop everything before the object in progress (or everything, between objects).
    fn compact(&mut self) {
        let keep_from = self.start.unwrap_or(self.buf.len());
        if keep_from > 0 {
            self.buf.drain(..keep_from);
            if self.start.is_some() {
                self.start = Some(0);
            }
        }
        self.scan = self.buf.len();
    }
}
