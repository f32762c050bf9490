use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};

use crate::error::RelayError;
use crate::metering::UsageCounter;
use crate::protocol::openai_chat::extract_delta_content;
use crate::stream::{EventStreamDecoder, ProtocolEvent, Utf8ChunkDecoder};
use crate::transport::UpstreamBody;

/// Live byte stream of decoded content fragments sent to the caller.
pub type OutboundStream = Pin<Box<dyn Stream<Item = Result<Bytes, RelayError>> + Send>>;

struct RelayState {
    upstream: UpstreamBody,
    utf8: Utf8ChunkDecoder,
    decoder: EventStreamDecoder,
    events: Vec<ProtocolEvent>,
    counter: UsageCounter,
    pending_error: Option<RelayError>,
    finished: bool,
}

impl RelayState {
    /// Decode one upstream chunk and collect its content fragments.
    ///
    /// Stops at the terminator or at the first record that fails to decode;
    /// both finalize the usage counter.
    fn process_chunk(&mut self, chunk: &[u8]) -> BytesMut {
        let text = self.utf8.decode(chunk);
        self.decoder.feed_into(&text, &mut self.events);

        let mut out = BytesMut::new();
        for event in self.events.drain(..) {
            match event {
                ProtocolEvent::Terminator => {
                    self.counter.finish();
                    self.finished = true;
                    break;
                }
                ProtocolEvent::Data { payload, .. } => match extract_delta_content(&payload) {
                    Ok(Some(fragment)) => {
                        if !fragment.is_empty() {
                            self.counter.add_text(&fragment);
                            out.extend_from_slice(fragment.as_bytes());
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "aborting stream on undecodable upstream record");
                        self.counter.finish();
                        self.pending_error = Some(err);
                        break;
                    }
                },
            }
        }
        out
    }

    fn fail(&mut self, err: RelayError) -> RelayError {
        self.counter.finish();
        self.finished = true;
        err
    }
}

/// Relay an upstream event stream as a stream of content fragments.
///
/// Upstream chunks are pulled one at a time and only after the previous
/// output has been consumed. Dropping the returned stream drops the upstream
/// body, and the counter reports itself if it was not finalized yet.
pub fn relay_event_stream(upstream: UpstreamBody, counter: UsageCounter) -> OutboundStream {
    let state = RelayState {
        upstream,
        utf8: Utf8ChunkDecoder::new(),
        decoder: EventStreamDecoder::new(),
        events: Vec::with_capacity(8),
        counter,
        pending_error: None,
        finished: false,
    };

    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(err) = state.pending_error.take() {
                state.finished = true;
                return Some((Err(err), state));
            }
            if state.finished {
                return None;
            }

            let Some(chunk) = state.upstream.next().await else {
                if state.decoder.has_pending() || state.utf8.has_pending() {
                    tracing::debug!("upstream closed with an incomplete record buffered");
                }
                let err = state.fail(RelayError::UpstreamStream(
                    "upstream closed the stream before [DONE]".to_string(),
                ));
                tracing::warn!(error = %err, "upstream stream ended early");
                return Some((Err(err), state));
            };
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(error = %err, "upstream body failed mid-stream");
                    let err = state.fail(err);
                    return Some((Err(err), state));
                }
            };

            let out = state.process_chunk(&bytes);
            if !out.is_empty() {
                return Some((Ok(out.freeze()), state));
            }
        }
    }))
}
