use http::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};

use crate::config::UpstreamConfig;
use crate::error::RelayError;

/// Precomputed upstream endpoint and static headers.
#[derive(Debug, Clone)]
pub struct PreparedUpstream {
    chat_url: url::Url,
    static_headers: HeaderMap,
    has_api_key: bool,
}

impl PreparedUpstream {
    /// Build the prepared upstream from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the chat URL or API key cannot be
    /// represented.
    pub fn new(upstream: &UpstreamConfig) -> Result<Self, RelayError> {
        let base = upstream.base_url.trim().trim_end_matches('/');
        let raw_url = format!("{base}{}", upstream.chat_path);
        let chat_url = url::Url::parse(&raw_url)
            .map_err(|err| RelayError::Config(format!("Invalid upstream URL '{raw_url}': {err}")))?;

        let mut static_headers = HeaderMap::new();
        static_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        static_headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/event-stream, application/json"),
        );
        let api_key = upstream.api_key.as_deref().map(str::trim);
        if let Some(key) = api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| RelayError::Config("upstream.api_key is not a valid header".into()))?;
            value.set_sensitive(true);
            static_headers.insert(AUTHORIZATION, value);
        }

        Ok(Self {
            chat_url,
            static_headers,
            has_api_key: api_key.is_some(),
        })
    }

    #[must_use]
    pub fn chat_url(&self) -> &url::Url {
        &self.chat_url
    }

    /// Headers for the forwarded request. Without a configured key the
    /// caller's `Authorization` header is passed through.
    #[must_use]
    pub fn forward_headers(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = self.static_headers.clone();
        if !self.has_api_key {
            if let Some(value) = inbound.get(AUTHORIZATION) {
                let mut value = value.clone();
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(api_key: Option<&str>) -> UpstreamConfig {
        UpstreamConfig {
            base_url: "https://api.example.com/".to_string(),
            chat_path: "/v1/chat/completions".to_string(),
            api_key: api_key.map(ToString::to_string),
        }
    }

    #[test]
    fn test_chat_url_joins_base_and_path() {
        let prepared = PreparedUpstream::new(&upstream(None)).expect("prepared");
        assert_eq!(
            prepared.chat_url().as_str(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_configured_key_wins_over_caller_header() {
        let prepared = PreparedUpstream::new(&upstream(Some("sk-server"))).expect("prepared");
        let mut inbound = HeaderMap::new();
        inbound.insert(AUTHORIZATION, HeaderValue::from_static("Bearer sk-caller"));
        let headers = prepared.forward_headers(&inbound);
        assert_eq!(headers[AUTHORIZATION], "Bearer sk-server");
        assert!(headers[AUTHORIZATION].is_sensitive());
        assert_eq!(headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_caller_key_forwarded_without_configured_key() {
        let prepared = PreparedUpstream::new(&upstream(None)).expect("prepared");
        let mut inbound = HeaderMap::new();
        inbound.insert(AUTHORIZATION, HeaderValue::from_static("Bearer sk-caller"));
        inbound.insert("access-code", HeaderValue::from_static("team-a"));
        let headers = prepared.forward_headers(&inbound);
        assert_eq!(headers[AUTHORIZATION], "Bearer sk-caller");
        assert!(headers.get("access-code").is_none());
    }

    #[test]
    fn test_no_authorization_when_none_available() {
        let prepared = PreparedUpstream::new(&upstream(None)).expect("prepared");
        let headers = prepared.forward_headers(&HeaderMap::new());
        assert!(headers.get(AUTHORIZATION).is_none());
    }
}
