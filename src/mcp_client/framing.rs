//! Newline framing for the stdio transport.
//!
//! Child stdout arrives in chunks that bear no relation to message
//! boundaries. `LineBuffer` accumulates bytes, yields every complete line as
//! a decoded JSON-RPC message and keeps the trailing partial line for the
//! next chunk.

use super::types::JsonRpcResponse;

/// Longest partial line kept while waiting for its newline.
const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Per-connection accumulator for partially received lines.
///
/// A partial line that outgrows the limit is dropped, and so is the rest of
/// it up to the next newline.
#[derive(Debug)]
pub struct LineBuffer {
    partial: Vec<u8>,
    discarding: bool,
    max_line_bytes: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self {
            partial: Vec::new(),
            discarding: false,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_limit(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            ..Self::default()
        }
    }

    /// Append a chunk and decode every line it completes.
    ///
    /// Blank lines are skipped. Lines that are not valid JSON-RPC are dropped
    /// without surfacing an error; they are logged at debug level only.
    pub fn feed(&mut self, mut chunk: &[u8]) -> Vec<JsonRpcResponse> {
        if self.discarding {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    self.discarding = false;
                    chunk = &chunk[end + 1..];
                }
                None => return Vec::new(),
            }
        }

        self.partial.extend_from_slice(chunk);

        let messages = match self.partial.iter().rposition(|b| *b == b'\n') {
            Some(last_newline) => {
                let remainder = self.partial.split_off(last_newline + 1);
                let complete = std::mem::replace(&mut self.partial, remainder);
                complete
                    .split(|b| *b == b'\n')
                    .filter_map(decode_line)
                    .collect()
            }
            None => Vec::new(),
        };

        if self.partial.len() > self.max_line_bytes {
            tracing::warn!(
                bytes = self.partial.len(),
                limit = self.max_line_bytes,
                "dropping oversized stdout line"
            );
            self.partial = Vec::new();
            self.discarding = true;
        }

        messages
    }

    /// Bytes held back waiting for their newline.
    pub fn pending_bytes(&self) -> &[u8] {
        &self.partial
    }
}

/// Decode one line, tolerating a trailing `\r`.
fn decode_line(line: &[u8]) -> Option<JsonRpcResponse> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }

    match serde_json::from_slice::<JsonRpcResponse>(line) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::debug!(
                error = %e,
                line = %String::from_utf8_lossy(line),
                "dropping malformed stdout line"
            );
            None
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
