use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, TryStreamExt};

use crate::error::RelayError;

/// Upstream body as a stream of raw chunks.
pub type UpstreamBody = Pin<Box<dyn Stream<Item = Result<Bytes, RelayError>> + Send>>;

/// Response received from the upstream chat service.
///
/// The body is either drained by [`UpstreamResponse::text`] or handed over
/// whole through [`UpstreamResponse::into_body`].
pub struct UpstreamResponse {
    status: http::StatusCode,
    content_type: Option<String>,
    body: UpstreamBody,
}

impl UpstreamResponse {
    pub fn new<S>(status: http::StatusCode, content_type: Option<String>, body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, RelayError>> + Send + 'static,
    {
        Self {
            status,
            content_type,
            body: Box::pin(body),
        }
    }

    /// Wrap a reqwest response without reading its body.
    #[must_use]
    pub fn from_reqwest(response: reqwest::Response) -> Self {
        let status = response.status();
        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes_stream().map_err(|err| {
            RelayError::UpstreamStream(format!("Failed to read upstream body: {err}"))
        });
        Self::new(status, content_type, body)
    }

    #[must_use]
    pub fn status(&self) -> http::StatusCode {
        self.status
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Whether the upstream answered with a streaming payload.
    #[must_use]
    pub fn is_event_stream(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|content_type| content_type.contains("stream"))
    }

    /// Read the whole body as (lossy) UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns the first error yielded by the body stream.
    pub async fn text(self) -> Result<String, RelayError> {
        let mut body = self.body;
        let mut collected = BytesMut::new();
        while let Some(chunk) = body.next().await {
            collected.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&collected).into_owned())
    }

    #[must_use]
    pub fn into_body(self) -> UpstreamBody {
        self.body
    }
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}
