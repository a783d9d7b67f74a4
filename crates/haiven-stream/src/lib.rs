//! Streaming response engine for prompt-driven assistant tools.
//!
//! A `StreamSession` opens a server-sent-event stream, appends every text
//! fragment to its buffer, re-materializes the buffer (markdown text or
//! best-effort JSON that tolerates truncation) and pushes the result to a
//! `RenderSink`. Each session ends with exactly one terminal callback. The
//! `StreamEngine` keeps at most one active session per caller-defined
//! channel.
//!
//! ```no_run
//! use haiven_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! let engine = StreamEngine::http(
//!     HttpTransportConfig::default().base_url("http://localhost:8080"),
//! )?;
//! let request = StreamRequest::post_json("/api/prompt", &serde_json::json!({
//!     "userinput": "Summarize the risks of this plan",
//! }))?;
//!
//! let (sink, mut events) = ChannelSink::channel();
//! engine.start("chat-thread-1", request, sink).await?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SinkEvent::Update(increment) => println!("{}", increment.display_text()),
//!         SinkEvent::Complete { outcome, .. } => {
//!             println!("-- {outcome}");
//!             break;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Cancellation coordinator keyed by channel.
pub mod engine;
/// Error types.
pub mod errors;
/// Materialized output types.
pub mod increment;
mod lenient;
/// Channel keys, session states and outcomes.
pub mod model;
/// Tracing subscriber setup.
pub mod observability;
/// Incremental text/JSON materialization.
pub mod parser;
/// Local pinboard persistence.
pub mod pinboard;
/// Common imports.
pub mod prelude;
/// Request description.
pub mod request;
/// Stream session lifecycle.
pub mod session;
/// Render sink contract.
pub mod sink;
/// Transport seam and the HTTP/SSE implementation.
pub mod transport;

pub use engine::StreamEngine;
pub use errors::{StoreError, StreamError};
pub use increment::ParsedIncrement;
pub use model::{ChannelKey, Outcome, SessionState};
pub use parser::IncrementalParser;
pub use pinboard::{JsonFileStore, KeyValueStore, MemoryStore, Pinboard, PinboardEntries};
pub use request::{Method, StreamRequest};
pub use session::StreamSession;
pub use sink::{ChannelSink, RenderSink, SinkEvent};
pub use transport::{EventStream, HttpTransport, HttpTransportConfig, Transport, TransportEvent};
