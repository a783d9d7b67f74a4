//! Common imports for typical engine usage.
pub use crate::{
    ChannelKey, ChannelSink, HttpTransportConfig, Outcome, ParsedIncrement, RenderSink,
    SessionState, SinkEvent, StreamEngine, StreamError, StreamRequest, StreamSession,
};
