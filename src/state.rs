use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::AppConfig;
use crate::error::RelayError;
use crate::metering::MeteringSink;
use crate::relay::StreamingRelay;
use crate::transport::{HttpTransport, PreparedUpstream};

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub relay: StreamingRelay,
    request_seq: AtomicU64,
}

impl AppState {
    /// Build state from a validated config.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the upstream or collector URL
    /// cannot be prepared.
    pub fn from_config(config: AppConfig) -> Result<Self, RelayError> {
        let metering = MeteringSink::from_config(&config.metering)?;
        Self::with_metering(config, metering)
    }

    /// Build state with an explicit metering sink.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the upstream URL cannot be prepared.
    pub fn with_metering(config: AppConfig, metering: MeteringSink) -> Result<Self, RelayError> {
        let upstream = PreparedUpstream::new(&config.upstream)?;
        let transport = HttpTransport::new(&config.server);
        Ok(Self::new(
            config,
            StreamingRelay::new(transport, upstream, metering),
        ))
    }

    #[must_use]
    pub fn new(config: AppConfig, relay: StreamingRelay) -> Self {
        Self {
            config,
            relay,
            request_seq: AtomicU64::new(1),
        }
    }

    pub fn next_request_seq(&self) -> u64 {
        self.request_seq.fetch_add(1, Ordering::Relaxed)
    }
}
