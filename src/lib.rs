pub(crate) mod api;
pub mod config;
pub mod error;
pub mod metering;
pub mod observability;
pub mod protocol;
pub mod relay;
pub mod routing;
pub mod state;
pub mod stream;
pub mod transport;
