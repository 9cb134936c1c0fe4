#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;

const DEFAULT_RETRY_INTERVAL_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_RETRY_INTERVAL_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.0;
const DEFAULT_MAX_RETRIES: u32 = 5;

/// Upper bound on connect attempts within a single `connect()` cycle.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxRetries {
    /// Give up once this many consecutive attempts have failed.
    ///
    /// `Limited(0)` behaves like `Limited(1)`: the first attempt always runs, and its failure
    /// is terminal.
    Limited(u32),
    /// Keep retrying forever.
    Unlimited,
}

impl MaxRetries {
    /// Whether attempt number `attempt` (1-based within a cycle) is past the bound.
    #[must_use]
    pub const fn is_exceeded_by(self, attempt: u32) -> bool {
        match self {
            Self::Limited(max) => {
                let max = if max == 0 { 1 } else { max };
                attempt > max
            }
            Self::Unlimited => false,
        }
    }

    /// The configured bound, if any.
    #[must_use]
    pub const fn limit(self) -> Option<u32> {
        match self {
            Self::Limited(max) => Some(max),
            Self::Unlimited => None,
        }
    }
}

impl Default for MaxRetries {
    fn default() -> Self {
        Self::Limited(DEFAULT_MAX_RETRIES)
    }
}

impl From<u32> for MaxRetries {
    fn from(value: u32) -> Self {
        Self::Limited(value)
    }
}

impl From<Option<u32>> for MaxRetries {
    fn from(value: Option<u32>) -> Self {
        value.map_or(Self::Unlimited, Self::Limited)
    }
}

/// Connection policy shared by every transport.
///
/// The defaults retry every second, five times, and reconnect automatically when the
/// remote side drops a live channel.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Delay before each retry or reconnect attempt
    #[builder(default = DEFAULT_RETRY_INTERVAL_DURATION)]
    pub retry_interval: Duration,
    /// Cap on the delay when `backoff_multiplier` grows it
    #[builder(default = DEFAULT_MAX_RETRY_INTERVAL_DURATION)]
    pub max_retry_interval: Duration,
    /// Growth factor applied to the delay after every failed attempt. `1.0` keeps it fixed.
    #[builder(default = DEFAULT_BACKOFF_MULTIPLIER)]
    pub backoff_multiplier: f64,
    /// Bound on consecutive attempts within one `connect()` cycle
    #[builder(default, into)]
    pub max_retries: MaxRetries,
    /// Whether a remote closure of a live channel triggers a reconnect
    #[builder(default = true)]
    pub auto_reconnect: bool,
    /// Maximum time a single transport open may take
    #[builder(default = DEFAULT_CONNECT_TIMEOUT_DURATION)]
    pub connect_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<&Config> for ExponentialBackoff {
    fn from(config: &Config) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.retry_interval)
            .with_max_interval(config.max_retry_interval.max(config.retry_interval))
            .with_multiplier(config.backoff_multiplier)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None) // Attempts are bounded by `max_retries` instead
            .build()
    }
}
