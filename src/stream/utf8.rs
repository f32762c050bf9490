/// Streaming UTF-8 decoder for network chunks.
///
/// A code point split across two chunks is held back until its remaining
/// bytes arrive. Invalid sequences decode to U+FFFD instead of failing.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    remainder: Vec<u8>,
}

impl Utf8ChunkDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, prefixed by any incomplete tail from the previous call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        if self.remainder.is_empty() {
            return match std::str::from_utf8(bytes) {
                Ok(text) => text.to_owned(),
                Err(_) => self.decode_slow(bytes),
            };
        }
        let mut joined = std::mem::take(&mut self.remainder);
        joined.extend_from_slice(bytes);
        self.decode_slow(&joined)
    }

    /// Flush an incomplete trailing sequence at end of input.
    pub fn finish(&mut self) -> String {
        if self.remainder.is_empty() {
            return String::new();
        }
        self.remainder.clear();
        char::REPLACEMENT_CHARACTER.to_string()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.remainder.is_empty()
    }

    fn decode_slow(&mut self, mut bytes: &[u8]) -> String {
        let mut out = String::with_capacity(bytes.len());
        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    out.push_str(text);
                    return out;
                }
                Err(err) => {
                    let (valid, rest) = bytes.split_at(err.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        out.push_str(text);
                    }
                    match err.error_len() {
                        Some(invalid_len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            bytes = &rest[invalid_len..];
                        }
                        None => {
                            self.remainder.extend_from_slice(rest);
                            return out;
                        }
                    }
                }
            }
        }
    }
}
