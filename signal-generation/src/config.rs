// Signal aggregation settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Endpoints, timeouts and fan-out limits for signal collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalsConfig {
    /// Base URL of the social-sentiment service, unset = source unavailable
    #[serde(default)]
    pub sentiment_url: Option<String>,
    #[serde(default)]
    pub market_data_url: Option<String>,
    #[serde(default)]
    pub analyst_url: Option<String>,

    /// Bound on a single source fetch
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,

    /// Lifetime of a persisted signal row
    #[serde(default = "default_signal_ttl_hours")]
    pub signal_ttl_hours: i64,

    /// How many trending tickers to pull from the sentiment source
    #[serde(default = "default_trending_limit")]
    pub trending_limit: usize,

    /// How many of those to analyse before the open
    #[serde(default = "default_pre_market_universe")]
    pub pre_market_universe: usize,

    /// Tickers aggregated concurrently within one session
    #[serde(default = "default_max_concurrent_tickers")]
    pub max_concurrent_tickers: usize,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            sentiment_url: None,
            market_data_url: None,
            analyst_url: None,
            source_timeout_secs: default_source_timeout_secs(),
            signal_ttl_hours: default_signal_ttl_hours(),
            trending_limit: default_trending_limit(),
            pre_market_universe: default_pre_market_universe(),
            max_concurrent_tickers: default_max_concurrent_tickers(),
        }
    }
}

impl SignalsConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn signal_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.signal_ttl_hours)
    }
}

fn default_source_timeout_secs() -> u64 {
    15
}

fn default_signal_ttl_hours() -> i64 {
    24
}

fn default_trending_limit() -> usize {
    50
}

fn default_pre_market_universe() -> usize {
    10
}

fn default_max_concurrent_tickers() -> usize {
    4
}
