//! Out-of-band usage metering.
//!
//! A [`UsageCounter`] accumulates the amount of text seen in one direction of
//! one request and hands exactly one [`UsageEntry`] to a [`MeteringSink`]. The
//! sink delivers entries on detached tasks so the relay never waits on the
//! collector.

mod counter;
mod sink;

pub use counter::UsageCounter;
pub use sink::MeteringSink;

use serde::{Deserialize, Serialize};

/// Which side of the exchange a usage entry measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "req")]
    Request,
    #[serde(rename = "res")]
    Response,
}

impl Direction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Request => "req",
            Direction::Response => "res",
        }
    }
}

/// Body of `POST <stat_url>/api/entry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub amount: u64,
    pub code: String,
    #[serde(rename = "type")]
    pub direction: Direction,
}

/// Amount contributed by `text`, in UTF-16 code units.
#[must_use]
pub fn usage_units(text: &str) -> u64 {
    text.encode_utf16().count() as u64
}
