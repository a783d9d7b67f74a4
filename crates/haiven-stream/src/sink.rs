use tokio::sync::mpsc;

use crate::errors::StreamError;
use crate::increment::ParsedIncrement;
use crate::model::Outcome;

/// Consumer of a session's output (typically a UI surface).
///
/// Callbacks run while the session holds its internal lock, so an
/// implementation must not call back into the same session (for example
/// `cancel()`) from inside a callback. Hand the work off instead.
pub trait RenderSink: Send + 'static {
    /// Called zero or more times while the session is active. Each increment
    /// supersedes the previous one.
    fn on_update(&mut self, increment: ParsedIncrement);

    /// Called exactly once per session with the terminal outcome and the last
    /// materialization. `error` is set for `Outcome::Failed`.
    fn on_complete(
        &mut self,
        outcome: Outcome,
        final_increment: ParsedIncrement,
        error: Option<StreamError>,
    );
}

/// Event forwarded by `ChannelSink`.
#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    Update(ParsedIncrement),
    Complete {
        outcome: Outcome,
        increment: ParsedIncrement,
        error: Option<StreamError>,
    },
}

impl SinkEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

/// Sink that forwards every callback into an unbounded channel, for async
/// consumers that want to `recv().await` increments.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    /// Creates the sink and the receiving half.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RenderSink for ChannelSink {
    fn on_update(&mut self, increment: ParsedIncrement) {
        let _ = self.tx.send(SinkEvent::Update(increment));
    }

    fn on_complete(
        &mut self,
        outcome: Outcome,
        final_increment: ParsedIncrement,
        error: Option<StreamError>,
    ) {
        let _ = self.tx.send(SinkEvent::Complete {
            outcome,
            increment: final_increment,
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_forwards_in_order() {
        let (mut sink, mut rx) = ChannelSink::channel();
        sink.on_update(ParsedIncrement::Text("a".into()));
        sink.on_complete(Outcome::Completed, ParsedIncrement::Text("ab".into()), None);

        assert_eq!(
            rx.try_recv().expect("update"),
            SinkEvent::Update(ParsedIncrement::Text("a".into()))
        );
        let terminal = rx.try_recv().expect("complete");
        assert!(terminal.is_terminal());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receiver_does_not_panic() {
        let (mut sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.on_update(ParsedIncrement::Empty);
        sink.on_complete(Outcome::Cancelled, ParsedIncrement::Empty, None);
    }
}
