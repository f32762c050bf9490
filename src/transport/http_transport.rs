use std::time::Duration;

use bytes::Bytes;

use super::{PreparedUpstream, UpstreamResponse};
use crate::config::ServerConfig;
use crate::error::RelayError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    timeout: Duration,
) -> Result<reqwest::Client, RelayError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|err| RelayError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// HTTP client used to reach the upstream chat service.
///
/// Requests are sent once; failures surface as [`RelayError::Transport`]
/// without retry.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with connection pooling and timeouts from the given
    /// server config.
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };
        let client = match build_reqwest_client(
            config.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            Duration::from_secs(config.timeout),
        ) {
            Ok(client) => client,
            Err(err) => {
                tracing::error!(error = %err, "failed to build configured reqwest client, falling back to default client");
                reqwest::Client::new()
            }
        };
        Self { client }
    }

    /// Forward a chat request body to the upstream and return the response
    /// head with its body still unread.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the request cannot be sent or
    /// no response head arrives.
    pub async fn send_chat(
        &self,
        upstream: &PreparedUpstream,
        inbound_headers: &http::HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamResponse, RelayError> {
        let mut request = reqwest::Request::new(http::Method::POST, upstream.chat_url().clone());
        *request.headers_mut() = upstream.forward_headers(inbound_headers);
        *request.body_mut() = Some(reqwest::Body::from(body));

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|err| RelayError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), "upstream returned non-success status");
        }
        Ok(UpstreamResponse::from_reqwest(response))
    }
}
