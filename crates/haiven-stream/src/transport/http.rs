use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;

use crate::errors::StreamError;
use crate::request::{Method, StreamRequest};

use super::config::HttpTransportConfig;
use super::sse::{SseDecoder, frame_to_event};
use super::{EventStream, Transport, TransportEvent};

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Server-sent-event transport over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// Creates a transport from explicit configuration.
    pub fn new(config: HttpTransportConfig) -> Result<Self, StreamError> {
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| StreamError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a transport configured from `HAIVEN_*` environment variables.
    pub fn from_env() -> Result<Self, StreamError> {
        Self::new(HttpTransportConfig::from_env()?)
    }

    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: &StreamRequest) -> Result<EventStream, StreamError> {
        let url = self.config.resolve_url(request.url())?;
        let method = match request.method() {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };
        debug!(%url, ?method, "opening event stream");

        let mut http_req = self
            .client
            .request(method, url.clone())
            .header(ACCEPT, "text/event-stream");
        for (name, value) in &self.config.default_headers {
            if request.header_value(name).is_none() {
                http_req = http_req.header(name, value);
            }
        }
        for (name, value) in request.headers() {
            http_req = http_req.header(name, value);
        }
        if !request.query_pairs().is_empty() {
            http_req = http_req.query(request.query_pairs());
        }
        if let Some(body) = request.body() {
            if request.header_value(CONTENT_TYPE.as_str()).is_none() {
                http_req = http_req.header(CONTENT_TYPE, "application/json");
            }
            http_req = http_req.body(body.clone());
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| StreamError::connection(format!("request to {url} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StreamError::status(
                status.as_u16(),
                format!("request to {url} failed with status {status}: {body}"),
            ));
        }

        Ok(Box::pin(sse_event_stream(Box::pin(response.bytes_stream()))))
    }
}

fn sse_event_stream(
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<TransportEvent, StreamError>> + Send {
    struct State {
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        pending: VecDeque<TransportEvent>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes_stream,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Ok(Some((event, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        let frames = state.decoder.push_chunk(&chunk);
                        state.pending.extend(frames.iter().filter_map(frame_to_event));
                    }
                    Some(Err(e)) => {
                        return Err(StreamError::connection(format!(
                            "event stream read failed: {e}"
                        )));
                    }
                    None => {
                        let tail = state.decoder.finish();
                        state.pending.extend(tail.as_ref().and_then(frame_to_event));
                        state.done = true;
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::increment::ParsedIncrement;
    use crate::model::{Outcome, SessionState};
    use crate::session::StreamSession;
    use crate::sink::{ChannelSink, SinkEvent};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::sync::mpsc::UnboundedReceiver;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SSE_BODY: &str = "data: {\"data\":\"He\"}\n\ndata: {\"data\":\"llo\"}\n\ndata: [DONE]\n\n";

    async fn collect(stream: EventStream) -> Vec<Result<TransportEvent, StreamError>> {
        stream.collect().await
    }

    fn transport_for(server: &MockServer) -> HttpTransport {
        HttpTransport::new(HttpTransportConfig::default().base_url(server.uri())).expect("transport")
    }

    #[tokio::test]
    async fn post_sends_json_content_type_and_decodes_events() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/prompt"))
            .and(header("content-type", "application/json"))
            .and(header("accept", "text/event-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let request = StreamRequest::post_json("/api/prompt", &serde_json::json!({"userinput": "hi"}))
            .expect("request");
        let stream = transport_for(&server).open(&request).await.expect("open");
        let events = collect(stream).await;
        assert_eq!(
            events,
            vec![
                Ok(TransportEvent::Chunk("He".into())),
                Ok(TransportEvent::Chunk("llo".into())),
                Ok(TransportEvent::Done),
            ]
        );
    }

    #[tokio::test]
    async fn get_encodes_prompt_in_query_string() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/make-cards"))
            .and(query_param("prompt", "two words"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("data: {\"data\":\"[]\"}\n\n", "text/event-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let request = StreamRequest::get("/api/make-cards").query("prompt", "two words");
        let stream = transport_for(&server).open(&request).await.expect("open");
        assert_eq!(
            collect(stream).await,
            vec![Ok(TransportEvent::Chunk("[]".into()))]
        );
    }

    #[tokio::test]
    async fn non_success_status_is_a_connection_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = match transport_for(&server).open(&StreamRequest::get("/api/x")).await {
            Ok(_) => panic!("503 should fail"),
            Err(err) => err,
        };
        assert_eq!(err.status_code(), Some(503));
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_connection_error() {
        let transport = HttpTransport::new(
            HttpTransportConfig::default().connect_timeout(std::time::Duration::from_secs(2)),
        )
        .expect("transport");
        let err = match transport.open(&StreamRequest::get("http://127.0.0.1:1/stream")).await {
            Ok(_) => panic!("nothing listens on port 1"),
            Err(err) => err,
        };
        assert!(matches!(err, StreamError::Connection { status_code: None, .. }));
    }

    async fn events_until_terminal(rx: &mut UnboundedReceiver<SinkEvent>) -> Vec<SinkEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("sink event in time")
                .expect("sink open");
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn session_over_http_completes_when_server_closes_without_sentinel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/prompt"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: {\"data\":\"He\"}\n\ndata: {\"data\":\"llo\"}\n\n",
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let (sink, mut rx) = ChannelSink::channel();
        let session = StreamSession::new(Arc::new(transport_for(&server)), sink);
        let request = StreamRequest::post_json("/api/prompt", &serde_json::json!({"userinput": "hi"}))
            .expect("request");
        session.start(request).await.expect("start");

        let events = events_until_terminal(&mut rx).await;
        assert_eq!(
            events.last(),
            Some(&SinkEvent::Complete {
                outcome: Outcome::Completed,
                increment: ParsedIncrement::Text("Hello".into()),
                error: None,
            })
        );
        assert!(events[..events.len() - 1]
            .iter()
            .all(|e| matches!(e, SinkEvent::Update(ParsedIncrement::Text(_)))));
        assert_eq!(session.wait().await, SessionState::Completed);
        assert_eq!(session.accumulated_text(), "Hello");
    }

    /// Serves one chunked SSE response that breaks off in the middle of a chunk.
    async fn serve_truncated_stream() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let frame = "data: {\"data\":\"He\"}\n\n";
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n{:x}\r\n{frame}\r\n40\r\ndata: {{\"da",
                frame.len()
            );
            socket
                .write_all(response.as_bytes())
                .await
                .expect("write response");
            socket.flush().await.expect("flush");
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn body_read_failure_mid_stream_fails_the_session_with_partial_output() {
        let base_url = serve_truncated_stream().await;
        let transport =
            HttpTransport::new(HttpTransportConfig::default().base_url(base_url)).expect("transport");
        let (sink, mut rx) = ChannelSink::channel();
        let session = StreamSession::new(Arc::new(transport), sink);
        session
            .start(StreamRequest::get("/api/prompt").query("prompt", "hi"))
            .await
            .expect("start");

        let events = events_until_terminal(&mut rx).await;
        assert_eq!(events[0], SinkEvent::Update(ParsedIncrement::Text("He".into())));
        match events.last() {
            Some(SinkEvent::Complete {
                outcome: Outcome::Failed,
                increment,
                error: Some(err),
            }) => {
                assert_eq!(increment, &ParsedIncrement::Text("He".into()));
                assert!(matches!(err, StreamError::Connection { status_code: None, .. }));
                assert!(err.to_string().contains("event stream read failed"));
            }
            other => panic!("expected a failed completion, got {other:?}"),
        }
        assert_eq!(session.wait().await, SessionState::Failed);
    }
}
