use serde::Deserialize;

use crate::error::RelayError;
use crate::metering::usage_units;

/// Chat Completion request body, reduced to what the relay reads.
///
/// The body is forwarded upstream byte-for-byte; this view is only used to
/// size the request for metering.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequestBody {
    pub messages: Vec<ChatMessage>,
}

/// One request message. `content` is usually a string but multimodal
/// payloads send an array of parts.
///
/// Any JSON value is accepted; elements that are not objects carry no
/// content.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "serde_json::Value")]
pub struct ChatMessage {
    pub content: Option<serde_json::Value>,
}

impl From<serde_json::Value> for ChatMessage {
    fn from(mut value: serde_json::Value) -> Self {
        let content = value
            .as_object_mut()
            .and_then(|message| message.remove("content"));
        Self { content }
    }
}

impl ChatMessage {
    /// Usage units of a string `content`; other shapes count as zero.
    #[must_use]
    pub fn content_units(&self) -> u64 {
        match self.content.as_ref() {
            Some(serde_json::Value::String(text)) => usage_units(text),
            _ => 0,
        }
    }
}

impl ChatRequestBody {
    /// Parse a raw request body.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] when the body is not a JSON
    /// object with a `messages` array.
    pub fn parse(body: &[u8]) -> Result<Self, RelayError> {
        serde_json::from_slice(body)
            .map_err(|err| RelayError::InvalidRequest(format!("Invalid chat request body: {err}")))
    }

    /// Sum of string message contents, in usage units.
    #[must_use]
    pub fn content_units(&self) -> u64 {
        self.messages.iter().map(ChatMessage::content_units).sum()
    }
}

/// One streamed Chat Completion chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    pub delta: ChunkDelta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

/// Extract the first choice's incremental content from a data record.
///
/// A missing or null `content` (role-only or finish chunks) is `Ok(None)`.
///
/// # Errors
///
/// Returns [`RelayError::Decode`] when the payload is not JSON, lacks a
/// `choices` array, has no choices, or the first choice has no `delta`.
pub fn extract_delta_content(payload: &str) -> Result<Option<String>, RelayError> {
    let chunk: ChatCompletionChunk = serde_json::from_str(payload)?;
    let first = chunk
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| RelayError::Decode("chunk has no choices".to_string()))?;
    Ok(first.delta.content)
}
