/// Best current materialization of a session's accumulated text.
///
/// Each increment supersedes the previous one; consumers replace their
/// displayed state rather than appending to it.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ParsedIncrement {
    /// Nothing but whitespace has arrived yet.
    #[default]
    Empty,
    /// Markdown or plain text accumulation.
    Text(String),
    /// JSON-shaped accumulation (object or array), possibly virtually closed.
    Structured(serde_json::Value),
}

impl ParsedIncrement {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns the text when this is a `Text` increment.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the value when this is a `Structured` increment.
    pub fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Structured(value) => Some(value),
            _ => None,
        }
    }

    /// Renders the increment for a plain-text surface such as a terminal.
    pub fn display_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(text) => text.clone(),
            Self::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }
}
