use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{FutureExt, Stream, StreamExt};

use crate::error::RelayError;
use crate::relay::{InboundRequest, OutboundStream, RelayOutcome};
use crate::state::AppState;

const PLAIN_TEXT: &str = "text/plain; charset=utf-8";

/// Chat stream handler.
///
/// Every outcome is a `200` response: either the live fragment stream or a
/// plain-text diagnostic block. Relay errors and panics never reach the
/// server. Once streaming has begun the headers are already sent, so a panic
/// while producing the body ends it with an error instead of a diagnostic.
pub async fn handler(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let request_seq = state.next_request_seq();
    let request = InboundRequest::new(headers, body);
    tracing::debug!(request_seq, code = request.access_code(), "chat stream request");

    let outcome = AssertUnwindSafe(state.relay.relay(request))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(RelayOutcome::Streaming(stream))) => {
            streaming_response(Body::from_stream(guard_body_stream(stream, request_seq)))
        }
        Ok(Ok(RelayOutcome::Diagnostic(text))) => diagnostic_response(text),
        Ok(Err(err)) => {
            tracing::error!(request_seq, error = %err, "chat stream relay failed");
            diagnostic_response(err.to_diagnostic_block())
        }
        Err(panic) => {
            let err = RelayError::Internal(panic_message(panic.as_ref()));
            tracing::error!(request_seq, error = %err, "chat stream relay panicked");
            diagnostic_response(err.to_diagnostic_block())
        }
    }
}

/// Turn a panic while polling the body into a final `Internal` error item.
fn guard_body_stream(
    stream: OutboundStream,
    request_seq: u64,
) -> impl Stream<Item = Result<Bytes, RelayError>> + Send + 'static {
    AssertUnwindSafe(stream).catch_unwind().map(move |item| {
        item.unwrap_or_else(|panic| {
            let err = RelayError::Internal(panic_message(panic.as_ref()));
            tracing::error!(request_seq, error = %err, "chat stream body panicked");
            Err(err)
        })
    })
}

fn streaming_response(body: Body) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(PLAIN_TEXT)),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        body,
    )
        .into_response()
}

fn diagnostic_response(text: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(PLAIN_TEXT))],
        text,
    )
        .into_response()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "relay panicked".to_string()
    }
}
