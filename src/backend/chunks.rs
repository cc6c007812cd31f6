//! Line framing for the incremental query response.
//!
//! The backend writes one JSON chunk per line. Server-sent-event framing
//! (`data:` prefixes, `event:`/`id:` fields, comment lines, the `[DONE]`
//! sentinel) is tolerated so the same decoder works behind SSE proxies.
//! Bytes are buffered until a full line is available, so chunks split across
//! network reads (including inside a UTF-8 sequence) decode correctly.

use tracing::warn;

use super::types::StreamChunk;

/// Incremental decoder from raw bytes to [`StreamChunk`]s.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    buffer: Vec<u8>,
    skipped: usize,
}

impl ChunkDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns every chunk completed by them, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        self.buffer.extend_from_slice(bytes);

        let mut chunks = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(chunk) = self.decode_line(&line) {
                chunks.push(chunk);
            }
        }
        chunks
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<StreamChunk> {
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line).into_iter().collect()
    }

    /// Lines that looked like payload but failed to decode.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<StreamChunk> {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();

        if line.is_empty() || line.starts_with(':') {
            return None;
        }
        if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:") {
            return None;
        }

        let payload = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
        if payload.is_empty() || payload == "[DONE]" {
            return None;
        }

        match serde_json::from_str::<StreamChunk>(payload) {
            Ok(chunk) => Some(chunk),
            Err(e) => {
                self.skipped += 1;
                warn!(
                    error = %e,
                    line_len = payload.len(),
                    "Skipping undecodable stream line"
                );
                None
            }
        }
    }
}
