//! Incremental decoder for `text/event-stream` bodies.

use log::debug;

use crate::models::stream::StreamEvent;

/// Splits a byte stream into event payloads.
///
/// Chunks may end anywhere, including inside a line or inside a multi-byte
/// character; incomplete lines stay buffered until the next `feed`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the payloads of every event completed by `chunk`.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(payload) = self.process_line(&line) {
                payloads.push(payload);
            }
        }

        payloads
    }

    /// Flushes an event left open when the body ended without a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(payload) = self.process_line(line.trim_end_matches('\r')) {
                return Some(payload);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            other => debug!("Ignoring event-stream field '{}'", other),
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        Some(payload)
    }
}

/// Decodes one event payload. `None` for the `[DONE]` sentinel some servers send.
pub fn parse_event(payload: &str) -> Option<Result<StreamEvent, serde_json::Error>> {
    let payload = payload.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    Some(serde_json::from_str(payload))
}
