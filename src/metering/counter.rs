use super::{usage_units, Direction, MeteringSink};
use crate::observability::log_usage_finished;

/// Running usage total for one direction of one request.
///
/// Reported at most once through [`UsageCounter::finish`]; a counter dropped
/// without being finished reports itself, so every counter produces exactly
/// one entry however the request ends.
pub struct UsageCounter {
    sink: MeteringSink,
    code: String,
    direction: Direction,
    amount: u64,
    reported: bool,
}

impl UsageCounter {
    #[must_use]
    pub fn new(sink: MeteringSink, code: impl Into<String>, direction: Direction) -> Self {
        Self {
            sink,
            code: code.into(),
            direction,
            amount: 0,
            reported: false,
        }
    }

    /// Add raw units. Ignored once the counter has been reported.
    pub fn add(&mut self, units: u64) {
        if self.reported {
            tracing::debug!(
                direction = self.direction.as_str(),
                units,
                "usage added after report, ignored"
            );
            return;
        }
        self.amount = self.amount.saturating_add(units);
    }

    pub fn add_text(&mut self, text: &str) {
        self.add(usage_units(text));
    }

    #[must_use]
    pub fn amount(&self) -> u64 {
        self.amount
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn is_reported(&self) -> bool {
        self.reported
    }

    /// Report the accumulated amount. Returns `false` if already reported.
    pub fn finish(&mut self) -> bool {
        if self.reported {
            return false;
        }
        self.reported = true;
        log_usage_finished(&self.code, self.direction, self.amount);
        self.sink.report(&self.code, self.direction, self.amount);
        true
    }
}

impl Drop for UsageCounter {
    fn drop(&mut self) {
        if !self.reported {
            tracing::debug!(
                direction = self.direction.as_str(),
                "usage counter dropped before finish, reporting now"
            );
            self.finish();
        }
    }
}

impl std::fmt::Debug for UsageCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageCounter")
            .field("code", &self.code)
            .field("direction", &self.direction)
            .field("amount", &self.amount)
            .field("reported", &self.reported)
            .finish()
    }
}
