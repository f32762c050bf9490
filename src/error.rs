use serde::Serialize;

/// Error type shared by the relay, transport and handler layers.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Upstream stream error: {0}")]
    UpstreamStream(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serializable form of a [`RelayError`] carried in diagnostic blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticPayload {
    pub error: &'static str,
    pub message: String,
}

impl RelayError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "config",
            RelayError::InvalidRequest(_) => "invalid_request",
            RelayError::Transport(_) => "transport",
            RelayError::UpstreamStream(_) => "upstream_stream",
            RelayError::Decode(_) => "decode",
            RelayError::Internal(_) => "internal",
        }
    }

    #[must_use]
    pub fn diagnostic_payload(&self) -> DiagnosticPayload {
        DiagnosticPayload {
            error: self.kind(),
            message: self.to_string(),
        }
    }

    /// Render this error as a fenced JSON diagnostic block.
    #[must_use]
    pub fn to_diagnostic_block(&self) -> String {
        let payload = self.diagnostic_payload();
        let json = serde_json::to_string_pretty(&payload)
            .unwrap_or_else(|_| format!("{{\"error\": \"{}\"}}", payload.error));
        fenced_json_block(&json)
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Decode(err.to_string())
    }
}

/// Wrap `content` in a fenced ```json block.
#[must_use]
pub fn fenced_json_block(content: &str) -> String {
    let mut out = String::with_capacity(content.len() + 12);
    out.push_str("```json\n");
    out.push_str(content);
    if !content.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("```");
    out
}
