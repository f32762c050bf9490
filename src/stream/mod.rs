pub mod sse;
pub mod utf8;

pub use sse::{data_record, done_record, EventStreamDecoder};
pub use utf8::Utf8ChunkDecoder;

/// Payload that marks the end of an upstream event stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded record from the upstream event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// A record whose payload is left uninterpreted for the caller.
    Data {
        event: Option<String>,
        payload: String,
    },
    /// The `[DONE]` sentinel record.
    Terminator,
}

impl ProtocolEvent {
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(self, ProtocolEvent::Terminator)
    }
}
