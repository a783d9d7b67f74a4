use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::debug;

use crate::errors::StreamError;
use crate::model::ChannelKey;
use crate::request::StreamRequest;
use crate::session::StreamSession;
use crate::sink::RenderSink;
use crate::transport::{HttpTransport, HttpTransportConfig, Transport};

type ActiveSessions = DashMap<ChannelKey, StreamSession>;

/// Starts sessions and keeps at most one active session per channel.
///
/// Starting a session on a channel cancels whatever session the channel
/// still holds before the new one opens its stream. A session leaves the
/// map when it reaches a terminal state, unless it was already replaced.
#[derive(Clone)]
pub struct StreamEngine {
    transport: Arc<dyn Transport>,
    active: Arc<ActiveSessions>,
}

impl StreamEngine {
    /// Creates an engine on top of any transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Creates an engine backed by `HttpTransport`.
    pub fn http(config: HttpTransportConfig) -> Result<Self, StreamError> {
        Ok(Self::new(Arc::new(HttpTransport::new(config)?)))
    }

    /// Starts `request` on `channel`, superseding the channel's previous
    /// session if it is still running.
    ///
    /// Returns the new session handle. Connection failures are returned here
    /// and also reported to `sink` as `Outcome::Failed`. Dropping the returned
    /// future before the stream opens cancels the session.
    pub async fn start(
        &self,
        channel: impl Into<ChannelKey>,
        request: StreamRequest,
        sink: impl RenderSink,
    ) -> Result<StreamSession, StreamError> {
        request.validate()?;
        let channel = channel.into();
        let session = StreamSession::new(self.transport.clone(), sink);
        session.on_terminal(release_hook(
            Arc::downgrade(&self.active),
            channel.clone(),
            session.id(),
        ));

        let replaced = self.active.insert(channel.clone(), session.clone());
        if let Some(previous) = replaced {
            debug!(%channel, previous = %previous.id(), next = %session.id(), "superseding active session");
            previous.cancel();
        }

        session.start(request).await?;
        Ok(session)
    }

    /// Cancels the channel's active session. Returns false when the channel
    /// holds none.
    pub fn cancel(&self, channel: &ChannelKey) -> bool {
        let session = self.active.get(channel).map(|entry| entry.value().clone());
        match session {
            Some(session) => {
                session.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every active session.
    pub fn cancel_all(&self) {
        let sessions: Vec<StreamSession> = self
            .active
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for session in sessions {
            session.cancel();
        }
    }

    /// Returns the channel's current session, if it has not finished yet.
    pub fn active(&self, channel: &ChannelKey) -> Option<StreamSession> {
        self.active.get(channel).map(|entry| entry.value().clone())
    }

    /// Number of channels with a running session.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Removes the channel entry once the session finishes, but only if the entry
/// still refers to that session.
fn release_hook(
    active: Weak<ActiveSessions>,
    channel: ChannelKey,
    session_id: uuid::Uuid,
) -> Box<dyn FnOnce() + Send + 'static> {
    Box::new(move || {
        if let Some(active) = active.upgrade() {
            active.remove_if(&channel, |_, session| session.id() == session_id);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::increment::ParsedIncrement;
    use crate::model::{Outcome, SessionState};
    use crate::sink::{ChannelSink, SinkEvent};
    use crate::transport::TransportEvent;
    use crate::transport::testing::{Script, ScriptedTransport};
    use std::time::Duration;

    fn request() -> StreamRequest {
        StreamRequest::get("/api/prompt").query("prompt", "hello")
    }

    async fn wait_until_empty(engine: &StreamEngine) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !engine.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("channel released");
    }

    #[tokio::test]
    async fn new_session_supersedes_the_active_one() {
        let (tx_a, script_a) = Script::channel();
        let (tx_b, script_b) = Script::channel();
        let engine = StreamEngine::new(ScriptedTransport::new([script_a, script_b]));
        let channel = ChannelKey::new("thread-1");

        let (sink_a, mut rx_a) = ChannelSink::channel();
        let a = engine
            .start(channel.clone(), request(), sink_a)
            .await
            .expect("start a");
        tx_a.unbounded_send(Ok(TransportEvent::Chunk("first".into())))
            .expect("send a");
        assert_eq!(
            rx_a.recv().await,
            Some(SinkEvent::Update(ParsedIncrement::Text("first".into())))
        );

        let (sink_b, mut rx_b) = ChannelSink::channel();
        let b = engine
            .start(channel.clone(), request(), sink_b)
            .await
            .expect("start b");
        assert_eq!(a.state(), SessionState::Cancelled);
        assert_eq!(
            engine.active(&channel).map(|s| s.id()),
            Some(b.id())
        );

        let _ = tx_a.unbounded_send(Ok(TransportEvent::Chunk(" late".into())));
        let _ = tx_a.unbounded_send(Ok(TransportEvent::Done));
        tx_b.unbounded_send(Ok(TransportEvent::Chunk("second".into())))
            .expect("send b");
        tx_b.unbounded_send(Ok(TransportEvent::Done)).expect("done b");
        assert_eq!(b.wait().await, SessionState::Completed);

        assert_eq!(
            rx_a.recv().await,
            Some(SinkEvent::Complete {
                outcome: Outcome::Cancelled,
                increment: ParsedIncrement::Text("first".into()),
                error: None,
            })
        );
        assert!(rx_a.try_recv().is_err());

        assert_eq!(
            rx_b.recv().await,
            Some(SinkEvent::Update(ParsedIncrement::Text("second".into())))
        );
        assert!(matches!(
            rx_b.recv().await,
            Some(SinkEvent::Complete { outcome: Outcome::Completed, .. })
        ));
        wait_until_empty(&engine).await;
    }

    #[tokio::test]
    async fn channels_are_independent() {
        let (_tx_a, script_a) = Script::channel();
        let (_tx_b, script_b) = Script::channel();
        let engine = StreamEngine::new(ScriptedTransport::new([script_a, script_b]));

        let (sink_a, _rx_a) = ChannelSink::channel();
        let (sink_b, _rx_b) = ChannelSink::channel();
        let a = engine.start("chat", request(), sink_a).await.expect("a");
        let b = engine.start("cards", request(), sink_b).await.expect("b");
        assert_eq!(engine.len(), 2);
        assert_eq!(a.state(), SessionState::Active);
        assert_eq!(b.state(), SessionState::Active);

        assert!(engine.cancel(&ChannelKey::new("chat")));
        assert_eq!(a.state(), SessionState::Cancelled);
        assert_eq!(b.state(), SessionState::Active);
        assert!(!engine.cancel(&ChannelKey::new("chat")));

        engine.cancel_all();
        assert_eq!(b.state(), SessionState::Cancelled);
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn completed_session_releases_its_channel() {
        let engine = StreamEngine::new(ScriptedTransport::new([Script::Events(vec![
            Ok(TransportEvent::Chunk("x".into())),
            Ok(TransportEvent::Done),
        ])]));
        let (sink, _rx) = ChannelSink::channel();
        let session = engine.start("k", request(), sink).await.expect("start");
        assert_eq!(session.wait().await, SessionState::Completed);
        wait_until_empty(&engine).await;
        assert!(engine.active(&ChannelKey::new("k")).is_none());
    }

    #[tokio::test]
    async fn abandoned_start_releases_its_channel() {
        let engine = StreamEngine::new(ScriptedTransport::new([Script::Hang]));
        let (sink, mut rx) = ChannelSink::channel();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            engine.start("k", request(), sink),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(engine.is_empty());
        assert!(matches!(
            rx.recv().await,
            Some(SinkEvent::Complete { outcome: Outcome::Cancelled, .. })
        ));
    }

    #[tokio::test]
    async fn superseding_a_session_still_connecting_unblocks_its_start() {
        let (tx, script) = Script::channel();
        let transport = ScriptedTransport::new([Script::Hang, script]);
        let engine = StreamEngine::new(transport.clone());
        let channel = ChannelKey::new("k");

        let (sink_a, mut rx_a) = ChannelSink::channel();
        let first = tokio::spawn({
            let engine = engine.clone();
            let channel = channel.clone();
            async move { engine.start(channel, request(), sink_a).await }
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.opened() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("first session connecting");

        let (sink_b, _rx_b) = ChannelSink::channel();
        let second = engine
            .start(channel.clone(), request(), sink_b)
            .await
            .expect("second start");
        let first = tokio::time::timeout(Duration::from_secs(5), first)
            .await
            .expect("superseded start returns")
            .expect("start task")
            .expect("start ok");
        assert_eq!(first.state(), SessionState::Cancelled);
        assert!(matches!(
            rx_a.recv().await,
            Some(SinkEvent::Complete { outcome: Outcome::Cancelled, .. })
        ));
        assert_eq!(engine.active(&channel).map(|s| s.id()), Some(second.id()));
        drop(tx);
    }

    #[tokio::test]
    async fn failed_connection_releases_its_channel() {
        let engine = StreamEngine::new(ScriptedTransport::new([Script::Refuse(
            StreamError::status(502, "bad gateway"),
        )]));
        let (sink, mut rx) = ChannelSink::channel();
        let err = engine
            .start("k", request(), sink)
            .await
            .expect_err("refused");
        assert_eq!(err.status_code(), Some(502));
        assert!(engine.is_empty());
        assert!(matches!(
            rx.recv().await,
            Some(SinkEvent::Complete { outcome: Outcome::Failed, error: Some(_), .. })
        ));
    }
}
