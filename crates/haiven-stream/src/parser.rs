use tracing::trace;

use crate::errors::StreamError;
use crate::increment::ParsedIncrement;
use crate::lenient;

/// Turns a growing text buffer into its best current materialization.
///
/// `feed` always receives the full accumulated text, never a delta, and
/// re-parses it from scratch. The only state carried between calls is the
/// buffer length (to detect regressions) and the last structured value, which
/// is returned again whenever the current buffer cannot be parsed.
#[derive(Debug, Default)]
pub struct IncrementalParser {
    consumed: usize,
    last_structured: Option<serde_json::Value>,
    degraded: bool,
}

impl IncrementalParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materializes `text`, the full buffer accumulated so far.
    ///
    /// Returns `ProtocolViolation` when `text` is shorter than the buffer seen
    /// by the previous call.
    pub fn feed(&mut self, text: &str) -> Result<ParsedIncrement, StreamError> {
        if text.len() < self.consumed {
            return Err(StreamError::protocol(format!(
                "accumulated buffer shrank from {} to {} bytes",
                self.consumed,
                text.len()
            )));
        }
        self.consumed = text.len();
        self.degraded = false;

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(ParsedIncrement::Empty);
        }

        let body = strip_code_fence(trimmed);
        if !body.starts_with(['{', '[']) {
            return Ok(self.fallback(text));
        }

        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            return Ok(self.structured(value));
        }

        self.degraded = true;
        match lenient::parse(body) {
            Some(value) => Ok(self.structured(value)),
            None => {
                trace!(len = text.len(), "lenient parse failed, using last good materialization");
                Ok(self.fallback(text))
            }
        }
    }

    /// True when the last `feed` result was produced by the lenient parser or
    /// by falling back from a structured-looking buffer. Expected mid-stream.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    fn structured(&mut self, value: serde_json::Value) -> ParsedIncrement {
        self.last_structured = Some(value.clone());
        ParsedIncrement::Structured(value)
    }

    fn fallback(&mut self, text: &str) -> ParsedIncrement {
        match &self.last_structured {
            Some(value) => {
                self.degraded = true;
                ParsedIncrement::Structured(value.clone())
            }
            None => ParsedIncrement::Text(text.to_string()),
        }
    }
}

/// Strips a surrounding markdown code fence (```` ```json ```` … ```` ``` ````).
/// An opening fence whose info line has not finished yet leaves nothing.
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some((_, body)) = rest.split_once('\n') else {
        return "";
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}
