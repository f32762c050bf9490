//! Incremental event-stream decoder.
//!
//! Buffers partial lines across arbitrary chunk boundaries and applies the
//! [SSE field rules](https://html.spec.whatwg.org/multipage/server-sent-events.html)
//! to turn text into [`ProtocolEvent`]s.
use super::{ProtocolEvent, DONE_SENTINEL};
use memchr::memchr2;

/// Buffered bytes above which consumed input is compacted eagerly.
const COMPACT_THRESHOLD: usize = 8 * 1024;

/// Incremental decoder for `data:` records terminated by a blank line.
///
/// Feed it text chunks split at any point; it emits the same events in the
/// same order as if the whole stream had arrived at once. One decoder serves
/// exactly one upstream response.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
    after_cr: bool,
}

impl EventStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw text and return any complete events, in arrival order.
    ///
    /// - `data:` lines append to the record payload (one leading space is
    ///   stripped; repeated lines are joined with `\n`)
    /// - `event:` names the record
    /// - lines starting with `:` are comments
    /// - `id:`, `retry:` and unknown fields are ignored
    /// - a field line without a colon has an empty value (`data` alone
    ///   appends an empty line)
    /// - a blank line completes the record; a payload of exactly `[DONE]`
    ///   becomes [`ProtocolEvent::Terminator`]
    pub fn feed(&mut self, chunk: &str) -> Vec<ProtocolEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete events into a caller-provided buffer.
    ///
    /// Lines end at `\n`, `\r\n` or a lone `\r`. A chunk ending in `\r`
    /// completes its line at once; a `\n` opening the next chunk is then
    /// skipped.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<ProtocolEvent>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        if self.after_cr && processed_up_to < self.buffer.len() {
            self.after_cr = false;
            if self.buffer.as_bytes()[processed_up_to] == b'\n' {
                processed_up_to += 1;
            }
        }

        let bytes = self.buffer.as_bytes();
        while let Some(rel_pos) = memchr2(b'\r', b'\n', &bytes[processed_up_to..]) {
            let line_end = processed_up_to + rel_pos;
            let mut next_line = line_end + 1;
            if bytes[line_end] == b'\r' {
                match bytes.get(next_line) {
                    Some(b'\n') => next_line += 1,
                    Some(_) => {}
                    None => self.after_cr = true,
                }
            }
            Self::process_line(
                &self.buffer[processed_up_to..line_end],
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                out,
            );
            processed_up_to = next_line;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= COMPACT_THRESHOLD);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Whether an incomplete line or record is still buffered.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.has_data || self.read_offset < self.buffer.len()
    }

    fn process_line(
        line: &str,
        event_type: &mut Option<String>,
        data_buffer: &mut String,
        has_data: &mut bool,
        events: &mut Vec<ProtocolEvent>,
    ) {
        if line.is_empty() {
            if *has_data {
                *has_data = false;
                let name = event_type.take();
                let payload = std::mem::take(data_buffer);
                if payload == DONE_SENTINEL {
                    events.push(ProtocolEvent::Terminator);
                } else {
                    events.push(ProtocolEvent::Data {
                        event: name,
                        payload,
                    });
                }
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        // A line without a colon is a field with an empty value.
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if *has_data {
                    data_buffer.push('\n');
                } else {
                    *has_data = true;
                }
                data_buffer.push_str(value);
            }
            "event" => *event_type = Some(value.to_string()),
            _ => {}
        }
    }
}

/// Encode `payload` as a single unnamed `data:` record.
#[must_use]
pub fn data_record(payload: &str) -> String {
    let mut out = String::with_capacity(8 + payload.len());
    out.push_str("data: ");
    out.push_str(payload);
    out.push_str("\n\n");
    out
}

/// The terminating `data: [DONE]` record.
#[must_use]
pub fn done_record() -> String {
    data_record(DONE_SENTINEL)
}
