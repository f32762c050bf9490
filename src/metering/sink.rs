use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::{Direction, UsageEntry};
use crate::config::MeteringConfig;
use crate::error::RelayError;

const ENTRY_PATH: &str = "/api/entry";

/// Fire-and-forget delivery of usage entries.
///
/// Cloning is cheap; every request clones the shared handle into its
/// counters.
#[derive(Clone, Default)]
pub struct MeteringSink {
    backend: Option<Backend>,
}

#[derive(Clone)]
enum Backend {
    Collector(Arc<Collector>),
    Channel(mpsc::UnboundedSender<UsageEntry>),
}

struct Collector {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl MeteringSink {
    /// A sink that drops every entry.
    #[must_use]
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    /// Build a sink from config. Without a `stat_url` the sink is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the collector URL cannot be parsed
    /// or the HTTP client cannot be built.
    pub fn from_config(config: &MeteringConfig) -> Result<Self, RelayError> {
        let Some(stat_url) = config.stat_url() else {
            return Ok(Self::disabled());
        };
        let endpoint = entry_endpoint(stat_url)?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| RelayError::Config(format!("Failed to build metering client: {err}")))?;
        Ok(Self {
            backend: Some(Backend::Collector(Arc::new(Collector { client, endpoint }))),
        })
    }

    /// An in-process sink that forwards entries to the returned receiver.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UsageEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                backend: Some(Backend::Channel(tx)),
            },
            rx,
        )
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Submit one usage entry. Never blocks and never fails; delivery errors
    /// are logged and dropped.
    pub fn report(&self, code: &str, direction: Direction, amount: u64) {
        let Some(backend) = self.backend.as_ref() else {
            tracing::trace!(direction = direction.as_str(), amount, "metering disabled");
            return;
        };
        let entry = UsageEntry {
            amount,
            code: code.to_owned(),
            direction,
        };
        match backend {
            Backend::Channel(tx) => {
                if tx.send(entry).is_err() {
                    tracing::debug!("usage receiver closed, entry dropped");
                }
            }
            Backend::Collector(collector) => {
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    tracing::warn!(
                        direction = direction.as_str(),
                        amount,
                        "no async runtime available, usage entry dropped"
                    );
                    return;
                };
                let collector = Arc::clone(collector);
                runtime.spawn(async move {
                    let _ = collector.deliver(entry).await;
                });
            }
        }
    }
}

impl std::fmt::Debug for MeteringSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.backend {
            None => "disabled".to_string(),
            Some(Backend::Channel(_)) => "channel".to_string(),
            Some(Backend::Collector(collector)) => collector.endpoint.to_string(),
        };
        f.debug_struct("MeteringSink")
            .field("backend", &backend)
            .finish()
    }
}

impl Collector {
    /// Post one entry. Returns whether the collector accepted it.
    async fn deliver(&self, entry: UsageEntry) -> bool {
        match self.post(&entry).await {
            Ok(response) => {
                tracing::debug!(
                    code = %entry.code,
                    direction = entry.direction.as_str(),
                    amount = entry.amount,
                    response = %response,
                    "usage entry recorded"
                );
                true
            }
            Err(err) => {
                tracing::warn!(
                    code = %entry.code,
                    direction = entry.direction.as_str(),
                    amount = entry.amount,
                    error = %err,
                    "usage report failed"
                );
                false
            }
        }
    }

    async fn post(&self, entry: &UsageEntry) -> Result<serde_json::Value, reqwest::Error> {
        self.client
            .post(self.endpoint.clone())
            .json(entry)
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await
    }
}

/// `<stat_url>/api/entry`, keeping any path prefix on the base URL.
fn entry_endpoint(stat_url: &str) -> Result<url::Url, RelayError> {
    let mut raw = stat_url.trim().trim_end_matches('/').to_string();
    raw.push_str(ENTRY_PATH);
    url::Url::parse(&raw)
        .map_err(|err| RelayError::Config(format!("Invalid metering stat_url: {err}")))
}
