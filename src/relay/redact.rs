use std::borrow::Cow;
use std::sync::LazyLock;

use regex_lite::Regex;

/// Replacement for the credential echoed back in upstream auth errors.
pub const REDACTED_CREDENTIAL: &str = "provided: ***. You";

/// Matches the key quoted in messages like
/// `Incorrect API key provided: sk-abc. You can find your API key at ...`.
static PROVIDED_CREDENTIAL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"provided:.*. You").ok());

/// Mask the first leaked credential in an upstream error body.
///
/// Only the `provided: <key>. You` phrasing is recognized; other wordings
/// pass through unchanged.
#[must_use]
pub fn redact_upstream_error(body: &str) -> Cow<'_, str> {
    match PROVIDED_CREDENTIAL.as_ref() {
        Some(pattern) => pattern.replace(body, REDACTED_CREDENTIAL),
        None => Cow::Borrowed("[upstream error body withheld]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_leaked_key() {
        let body = r#"{"error":{"message":"Incorrect API key provided: sk-live-1234567890. You can find your API key at https://platform.openai.com/account/api-keys.","type":"invalid_request_error"}}"#;
        let redacted = redact_upstream_error(body);
        assert!(!redacted.contains("sk-live-1234567890"));
        assert!(redacted.contains("Incorrect API key provided: ***. You can find"));
    }

    #[test]
    fn test_untouched_without_pattern() {
        let body = r#"{"error":{"message":"Rate limit reached"}}"#;
        let redacted = redact_upstream_error(body);
        assert!(matches!(redacted, Cow::Borrowed(_)));
        assert_eq!(redacted, body);
    }

    #[test]
    fn test_match_is_line_bounded() {
        let body = "key provided: sk-1\nnext line. You";
        assert_eq!(redact_upstream_error(body), body);
    }

    #[test]
    fn test_only_first_occurrence_is_replaced() {
        let body = "provided: a. You\nprovided: b. You";
        assert_eq!(
            redact_upstream_error(body),
            "provided: ***. You\nprovided: b. You"
        );
    }
}
