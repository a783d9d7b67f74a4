use tracing::debug;

use super::TransportEvent;

/// Literal payload the server sends to mark normal completion.
pub(crate) const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Splits a byte stream into server-sent-event frames.
///
/// Bytes are buffered until a blank line closes the frame, so a multi-byte
/// character split across network chunks is decoded whole. Bytes already
/// scanned for a frame boundary are not scanned again.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
    scanned: usize,
}

/// Longest delimiter (`\r\n\r\n`) minus one: a boundary can start this many
/// bytes before the end of the buffer and still be incomplete.
const BOUNDARY_CARRY: usize = 3;

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((end, delimiter_len)) = frame_boundary(&self.buf, self.scanned) {
            let frame: Vec<u8> = self.buf.drain(..end + delimiter_len).take(end).collect();
            frames.extend(parse_frame(&frame));
            self.scanned = 0;
        }
        self.scanned = self.buf.len().saturating_sub(BOUNDARY_CARRY);
        frames
    }

    /// Flushes a final frame the server did not terminate with a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        self.scanned = 0;
        let rest = std::mem::take(&mut self.buf);
        parse_frame(&rest)
    }
}

fn frame_boundary(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    (from..buf.len().saturating_sub(1)).find_map(|i| match &buf[i..i + 2] {
        b"\n\n" => Some((i, 2)),
        b"\r\n" if buf[i + 2..].starts_with(b"\r\n") => Some((i, 4)),
        _ => None,
    })
}

fn parse_frame(bytes: &[u8]) -> Option<SseFrame> {
    let text = String::from_utf8_lossy(bytes);
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for line in text.split('\n').map(|l| l.trim_end_matches('\r')) {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

/// Maps a frame to a transport event.
///
/// Payloads are `{"data": "<fragment>"}` objects or the `[DONE]` sentinel.
/// An object without a string `data` member is metadata and is skipped. Any
/// other payload, JSON scalar or array or plain text, is passed through as
/// a raw fragment.
pub(crate) fn frame_to_event(frame: &SseFrame) -> Option<TransportEvent> {
    let data = frame.data.trim();
    if data.is_empty() {
        return None;
    }
    if data == DONE_SENTINEL {
        return Some(TransportEvent::Done);
    }
    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(serde_json::Value::Object(fields)) => fields
            .get("data")
            .and_then(|v| v.as_str())
            .map(|fragment| TransportEvent::Chunk(fragment.to_string())),
        _ => {
            debug!(len = frame.data.len(), "passing through raw event data");
            Some(TransportEvent::Chunk(frame.data.clone()))
        }
    }
}
