use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt as _;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::errors::StreamError;
use crate::increment::ParsedIncrement;
use crate::model::{Outcome, SessionState};
use crate::parser::IncrementalParser;
use crate::request::StreamRequest;
use crate::sink::RenderSink;
use crate::transport::{EventStream, Transport, TransportEvent};

type TerminalHook = Box<dyn FnOnce() + Send + 'static>;

/// One request/response cycle against a streaming endpoint.
///
/// The handle is cheap to clone; all clones refer to the same session. A
/// session is started at most once and delivers exactly one terminal
/// callback to its sink, whichever of sentinel, stream close, transport
/// error or `cancel()` comes first.
#[derive(Clone)]
pub struct StreamSession {
    shared: Arc<Shared>,
}

struct Shared {
    id: uuid::Uuid,
    transport: Arc<dyn Transport>,
    inner: Mutex<Inner>,
    status: watch::Sender<SessionState>,
    abort: watch::Sender<bool>,
}

struct Inner {
    state: SessionState,
    request: Option<StreamRequest>,
    accumulated: String,
    parser: IncrementalParser,
    current: ParsedIncrement,
    seq: u64,
    sink: Box<dyn RenderSink>,
    on_terminal: Option<TerminalHook>,
}

impl StreamSession {
    /// Creates an idle session that will report to `sink`.
    pub fn new(transport: Arc<dyn Transport>, sink: impl RenderSink) -> Self {
        let (status, _) = watch::channel(SessionState::Idle);
        let (abort, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                id: uuid::Uuid::new_v4(),
                transport,
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    request: None,
                    accumulated: String::new(),
                    parser: IncrementalParser::new(),
                    current: ParsedIncrement::Empty,
                    seq: 0,
                    sink: Box::new(sink),
                    on_terminal: None,
                }),
                status,
                abort,
            }),
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Raw text received so far.
    pub fn accumulated_text(&self) -> String {
        self.lock().accumulated.clone()
    }

    /// Last materialization pushed to the sink.
    pub fn current_increment(&self) -> ParsedIncrement {
        self.lock().current.clone()
    }

    /// The request this session was started with.
    pub fn request(&self) -> Option<StreamRequest> {
        self.lock().request.clone()
    }

    /// Opens the stream and starts delivering increments.
    ///
    /// Fails with `InvalidState` unless the session is idle. If the transport
    /// cannot connect, the sink receives `Outcome::Failed` and the same error
    /// is returned here. Resolves early with `Ok` when the session is
    /// cancelled or its deadline passes while connecting. Dropping the future
    /// before the stream opens cancels the session. Must be called from
    /// within a tokio runtime.
    pub async fn start(&self, request: StreamRequest) -> Result<(), StreamError> {
        request.validate()?;
        {
            let mut inner = self.lock();
            if inner.state != SessionState::Idle {
                return Err(StreamError::InvalidState {
                    expected: SessionState::Idle,
                    actual: inner.state,
                });
            }
            inner.state = SessionState::Active;
            inner.request = Some(request.clone());
        }
        self.shared.status.send_replace(SessionState::Active);
        info!(session_id = %self.id(), url = request.url(), method = ?request.method(), "stream session started");

        let deadline = request.deadline().map(|d| Instant::now() + d);
        let mut abort_rx = self.shared.abort.subscribe();
        let guard = ConnectGuard {
            session: self,
            armed: true,
        };

        let opened = tokio::select! {
            biased;
            _ = abort_rx.wait_for(|aborted| *aborted) => {
                debug!(session_id = %self.id(), "cancelled while connecting");
                return Ok(());
            }
            _ = sleep_until_deadline(deadline) => {
                warn!(session_id = %self.id(), "deadline elapsed while connecting");
                self.cancel();
                return Ok(());
            }
            opened = self.shared.transport.open(&request) => opened,
        };
        let events = match opened {
            Ok(events) => events,
            Err(err) => {
                self.finish(Outcome::Failed, Some(err.clone()));
                return Err(err);
            }
        };

        if self.state() != SessionState::Active {
            debug!(session_id = %self.id(), "session ended while connecting, dropping stream");
            return Ok(());
        }
        tokio::spawn(drive(self.clone(), events, abort_rx, deadline));
        guard.disarm();
        Ok(())
    }

    /// Cancels the session.
    ///
    /// The sink receives `Outcome::Cancelled` before this returns, and no
    /// callback runs afterwards. The transport stream is dropped by the
    /// driver task, closing the connection. Calling it again, or on a
    /// finished session, does nothing.
    pub fn cancel(&self) {
        let inner = self.lock();
        if inner.state.is_terminal() {
            return;
        }
        self.settle(inner, Outcome::Cancelled, None);
        self.shared.abort.send_replace(true);
    }

    /// Waits until the session reaches a terminal state and returns it.
    ///
    /// Never resolves for a session that is neither started nor cancelled.
    pub async fn wait(&self) -> SessionState {
        let mut rx = self.shared.status.subscribe();
        match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// Registers a callback that runs once, after the terminal notification.
    pub(crate) fn on_terminal(&self, hook: TerminalHook) {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            drop(inner);
            hook();
            return;
        }
        inner.on_terminal = Some(hook);
    }

    /// Applies one received fragment. Returns false once the session is no
    /// longer active and the driver should stop.
    fn on_chunk(&self, fragment: &str) -> bool {
        if fragment.is_empty() {
            return true;
        }
        let mut inner = self.lock();
        if inner.state != SessionState::Active {
            return false;
        }

        inner.accumulated.push_str(fragment);
        let inner_ref = &mut *inner;
        let parsed = inner_ref.parser.feed(&inner_ref.accumulated);
        match parsed {
            Ok(increment) => {
                let seq = inner.seq;
                inner.seq = inner.seq.saturating_add(1);
                debug!(
                    session_id = %self.id(),
                    seq,
                    bytes = inner.accumulated.len(),
                    degraded = inner.parser.is_degraded(),
                    "stream chunk"
                );
                inner.current = increment.clone();
                inner.sink.on_update(increment);
                true
            }
            Err(err) => {
                error!(session_id = %self.id(), error = %err, "incremental parse broke an invariant");
                self.settle(inner, Outcome::Failed, Some(err));
                false
            }
        }
    }

    fn finish(&self, outcome: Outcome, error: Option<StreamError>) {
        let inner = self.lock();
        self.settle(inner, outcome, error);
    }

    /// Delivers the terminal callback if the session has not finished yet.
    fn settle(
        &self,
        mut inner: MutexGuard<'_, Inner>,
        outcome: Outcome,
        error: Option<StreamError>,
    ) {
        if inner.state.is_terminal() {
            return;
        }
        let state = outcome.state();
        inner.state = state;
        match &error {
            Some(err) => warn!(session_id = %self.id(), %outcome, error = %err, bytes = inner.accumulated.len(), "stream session finished"),
            None => info!(session_id = %self.id(), %outcome, bytes = inner.accumulated.len(), "stream session finished"),
        }
        let final_increment = inner.current.clone();
        inner.sink.on_complete(outcome, final_increment, error);
        let hook = inner.on_terminal.take();
        drop(inner);

        self.shared.status.send_replace(state);
        if let Some(hook) = hook {
            hook();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Cancels the session if `start` is dropped before the driver task owns it.
struct ConnectGuard<'a> {
    session: &'a StreamSession,
    armed: bool,
}

impl ConnectGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.session.cancel();
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Pumps transport events into the session until a terminal event, an
/// abort signal, or the deadline.
async fn drive(
    session: StreamSession,
    mut events: EventStream,
    mut abort_rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
) {
    let expired = sleep_until_deadline(deadline);
    tokio::pin!(expired);

    loop {
        tokio::select! {
            biased;
            changed = abort_rx.changed() => {
                if changed.is_err() || *abort_rx.borrow() {
                    debug!(session_id = %session.id(), "abort observed, closing transport stream");
                    return;
                }
            }
            _ = &mut expired => {
                warn!(session_id = %session.id(), "session deadline elapsed");
                session.cancel();
                return;
            }
            next = events.next() => {
                match next {
                    Some(Ok(TransportEvent::Chunk(fragment))) => {
                        if !session.on_chunk(&fragment) {
                            return;
                        }
                    }
                    Some(Ok(TransportEvent::Done)) => {
                        session.finish(Outcome::Completed, None);
                        return;
                    }
                    Some(Err(err)) => {
                        session.finish(Outcome::Failed, Some(err));
                        return;
                    }
                    None => {
                        debug!(session_id = %session.id(), "transport closed without sentinel");
                        session.finish(Outcome::Completed, None);
                        return;
                    }
                }
            }
        }
    }
}
