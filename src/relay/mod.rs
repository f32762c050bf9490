//! Streaming relay: forwards a chat request upstream and turns the upstream
//! event stream into a live stream of content fragments.
//!
//! Usage is metered in both directions. The request side is measured by a
//! detached task that never blocks the upstream call; the response side is
//! accumulated while fragments are forwarded and reported exactly once.

mod outbound;
mod redact;

use bytes::Bytes;

use crate::error::{fenced_json_block, RelayError};
use crate::metering::{Direction, MeteringSink, UsageCounter};
use crate::protocol::openai_chat::ChatRequestBody;
use crate::transport::{HttpTransport, PreparedUpstream, UpstreamResponse};

pub use outbound::{relay_event_stream, OutboundStream};
pub use redact::{redact_upstream_error, REDACTED_CREDENTIAL};

/// Header carrying the caller identifier used for usage attribution.
pub const ACCESS_CODE_HEADER: &str = "access-code";

/// An inbound chat request with its body already buffered.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

impl InboundRequest {
    #[must_use]
    pub fn new(headers: http::HeaderMap, body: Bytes) -> Self {
        Self { headers, body }
    }

    /// The caller identifier, or an empty string when absent or not ASCII.
    #[must_use]
    pub fn access_code(&self) -> &str {
        self.headers
            .get(ACCESS_CODE_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
    }
}

/// What the relay hands back to the request handler.
pub enum RelayOutcome {
    /// Live fragment stream from a streaming upstream response.
    Streaming(OutboundStream),
    /// Redacted upstream body wrapped in a fenced block.
    Diagnostic(String),
}

impl std::fmt::Debug for RelayOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayOutcome::Streaming(_) => f.write_str("Streaming(..)"),
            RelayOutcome::Diagnostic(text) => f.debug_tuple("Diagnostic").field(text).finish(),
        }
    }
}

/// Relays chat requests to one upstream service.
#[derive(Debug, Clone)]
pub struct StreamingRelay {
    transport: HttpTransport,
    upstream: PreparedUpstream,
    metering: MeteringSink,
}

impl StreamingRelay {
    #[must_use]
    pub fn new(transport: HttpTransport, upstream: PreparedUpstream, metering: MeteringSink) -> Self {
        Self {
            transport,
            upstream,
            metering,
        }
    }

    #[must_use]
    pub fn metering(&self) -> &MeteringSink {
        &self.metering
    }

    #[must_use]
    pub fn upstream(&self) -> &PreparedUpstream {
        &self.upstream
    }

    /// Forward `request` upstream and relay the answer.
    ///
    /// Request-side usage is measured concurrently and reported regardless
    /// of the upstream outcome.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the upstream cannot be reached,
    /// or the body read error of a non-streaming response.
    pub async fn relay(&self, request: InboundRequest) -> Result<RelayOutcome, RelayError> {
        let code = request.access_code().to_owned();
        self.spawn_preflight(&code, request.body.clone());

        let response = self
            .transport
            .send_chat(&self.upstream, &request.headers, request.body)
            .await?;
        self.relay_response(response, code).await
    }

    fn spawn_preflight(&self, code: &str, body: Bytes) {
        let mut counter = UsageCounter::new(self.metering.clone(), code, Direction::Request);
        let task = async move {
            match ChatRequestBody::parse(&body) {
                Ok(parsed) => counter.add(parsed.content_units()),
                Err(err) => {
                    tracing::warn!(error = %err, "pre-flight metering could not read request body");
                }
            }
            counter.finish();
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
            }
            Err(_) => tracing::warn!("no tokio runtime; skipping pre-flight metering"),
        }
    }

    /// Turn an upstream response into the relay outcome.
    ///
    /// # Errors
    ///
    /// Returns the body read error when a non-streaming response cannot be
    /// fully read.
    pub async fn relay_response(
        &self,
        response: UpstreamResponse,
        code: String,
    ) -> Result<RelayOutcome, RelayError> {
        if !response.is_event_stream() {
            let status = response.status();
            let text = response.text().await?;
            let redacted = redact_upstream_error(&text);
            tracing::warn!(
                status = status.as_u16(),
                body = %redacted,
                "upstream answered without a stream"
            );
            return Ok(RelayOutcome::Diagnostic(fenced_json_block(&redacted)));
        }

        let counter = UsageCounter::new(self.metering.clone(), code, Direction::Response);
        Ok(RelayOutcome::Streaming(relay_event_stream(
            response.into_body(),
            counter,
        )))
    }
}
