use haiven_stream::{ParsedIncrement, SinkEvent};

/// Turns sink events into terminal output.
///
/// Text grows in place, so only the unseen suffix is written. Structured
/// output is printed once, pretty, when the session finishes.
#[derive(Default)]
pub struct TerminalRenderer {
    printed: String,
}

impl TerminalRenderer {
    /// Returns the text to write to stdout for `event`.
    pub fn render(&mut self, event: &SinkEvent) -> String {
        match event {
            SinkEvent::Update(ParsedIncrement::Text(text)) => self.text_suffix(text),
            SinkEvent::Update(_) => String::new(),
            SinkEvent::Complete { increment, .. } => match increment {
                ParsedIncrement::Text(text) => {
                    let mut out = self.text_suffix(text);
                    out.push('\n');
                    out
                }
                ParsedIncrement::Structured(_) => format!("{}\n", increment.display_text()),
                ParsedIncrement::Empty => String::new(),
            },
        }
    }

    fn text_suffix(&mut self, text: &str) -> String {
        let out = match text.strip_prefix(self.printed.as_str()) {
            Some(rest) => rest.to_string(),
            None => format!("\n{text}"),
        };
        self.printed = text.to_string();
        out
    }
}
