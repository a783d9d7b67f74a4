//! Transport seam between a session and the network.
//!
//! A transport turns a `StreamRequest` into an ordered stream of
//! `TransportEvent`s. Dropping the returned stream must abort the underlying
//! connection; sessions rely on this for cancellation.
mod config;
mod http;
pub(crate) mod sse;

pub use config::HttpTransportConfig;
pub use http::HttpTransport;

use std::pin::Pin;

use crate::errors::StreamError;
use crate::request::StreamRequest;

/// One decoded event from the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text fragment to append to the accumulated output.
    Chunk(String),
    /// The server's `[DONE]` sentinel.
    Done,
}

/// Ordered events of one open stream. An `Err` item ends the stream.
pub type EventStream =
    Pin<Box<dyn futures::Stream<Item = Result<TransportEvent, StreamError>> + Send + 'static>>;

/// Opens event streams for requests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Establishes the connection. Fails with `StreamError::Connection` when
    /// the endpoint cannot be reached or rejects the request.
    async fn open(&self, request: &StreamRequest) -> Result<EventStream, StreamError>;
}
