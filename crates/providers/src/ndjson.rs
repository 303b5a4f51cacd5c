//! Incremental decoder for newline-delimited JSON generation streams.
//!
//! Network chunks do not respect line boundaries, and a chunk may even end
//! inside a multi-byte character, so bytes are buffered until a full line is
//! available. Lines that do not parse are logged and skipped.

use lectern_core::model::GenerateChunk;
use tracing::warn;

#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every chunk completed by them, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<GenerateChunk> {
        self.buffer.extend_from_slice(bytes);

        let mut chunks = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            if let Some(chunk) = parse_line(&line[..line.len() - 1]) {
                chunks.push(chunk);
            }
        }
        chunks
    }

    /// Decode whatever is left once the body has ended. A final line
    /// without a trailing newline is still a line.
    pub fn finish(&mut self) -> Option<GenerateChunk> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }
}

/// Parse one line. Blank lines yield nothing; malformed ones are skipped.
pub fn parse_line(raw: &[u8]) -> Option<GenerateChunk> {
    let Ok(text) = std::str::from_utf8(raw) else {
        warn!("Received non-UTF-8 line in NDJSON stream, skipping");
        return None;
    };
    let line = text.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<GenerateChunk>(line) {
        Ok(chunk) => Some(chunk),
        Err(e) => {
            warn!(error = %e, data = %line, "Failed to parse NDJSON line, skipping");
            None
        }
    }
}
