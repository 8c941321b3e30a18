//! Server-sent-events framing over an incremental byte stream.

/// Incremental SSE line framer.
///
/// Feed raw body bytes with [`push`](SseFramer::push), then drain complete
/// `data:` payloads with [`next_data`](SseFramer::next_data). Blank lines,
/// `:`-prefixed comments and non-data fields (`event:`, `id:`) are skipped.
#[derive(Debug, Default)]
pub struct SseFramer {
    buffer: String,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
    }

    /// Next complete `data:` payload, if a full line is buffered.
    pub fn next_data(&mut self) -> Option<String> {
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(data) = data_payload(line.trim_end_matches(['\n', '\r'])) {
                return Some(data);
            }
        }
        None
    }

    /// Trailing `data:` payload left without a newline when the body ends
    /// (e.g. the connection dropped mid-event).
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        data_payload(rest.trim_end_matches(['\n', '\r']))
    }
}

fn data_payload(line: &str) -> Option<String> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let data = line
        .strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))?;
    Some(data.to_string())
}
