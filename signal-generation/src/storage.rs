// Signal Storage Interface
// Persists one decaying signal row per available source after each aggregation

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalSource {
    Sentiment,
    Technical,
    Analyst,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Sentiment => "SENTIMENT",
            SignalSource::Technical => "TECHNICAL",
            SignalSource::Analyst => "ANALYST",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SENTIMENT" => Some(SignalSource::Sentiment),
            "TECHNICAL" => Some(SignalSource::Technical),
            "ANALYST" => Some(SignalSource::Analyst),
            _ => None,
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted single-source reading. Never mutated; it simply expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub ticker: String,
    pub source: SignalSource,
    /// -1 to 1
    pub sentiment_score: f64,
    /// 0 to 1
    pub strength: f64,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(
        ticker: impl Into<String>,
        source: SignalSource,
        sentiment_score: f64,
        strength: f64,
        data: serde_json::Value,
        ttl: Duration,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            ticker: ticker.into(),
            source,
            sentiment_score: sentiment_score.clamp(-1.0, 1.0),
            strength: strength.clamp(0.0, 1.0),
            data,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Trait for signal storage backends
#[async_trait::async_trait]
pub trait SignalStore: Send + Sync {
    /// Append a signal
    async fn store(&self, signal: &Signal) -> Result<()>;

    /// Signals for a ticker created at or after `since`, newest first
    async fn by_ticker_since(&self, ticker: &str, since: DateTime<Utc>) -> Result<Vec<Signal>>;
}

/// In-memory signal storage (for testing and development)
pub struct InMemorySignalStore {
    signals: tokio::sync::RwLock<HashMap<String, Vec<Signal>>>,
}

impl InMemorySignalStore {
    pub fn new() -> Self {
        Self {
            signals: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub async fn total(&self) -> usize {
        self.signals.read().await.values().map(Vec::len).sum()
    }
}

impl Default for InMemorySignalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SignalStore for InMemorySignalStore {
    async fn store(&self, signal: &Signal) -> Result<()> {
        let now = Utc::now();
        let mut signals = self.signals.write().await;
        // Expired rows are never returned, so drop them as new ones arrive
        signals.retain(|_, list| {
            list.retain(|s| s.is_active(now));
            !list.is_empty()
        });
        signals
            .entry(signal.ticker.to_ascii_uppercase())
            .or_default()
            .push(signal.clone());
        Ok(())
    }

    async fn by_ticker_since(&self, ticker: &str, since: DateTime<Utc>) -> Result<Vec<Signal>> {
        let signals = self.signals.read().await;
        let mut matching: Vec<Signal> = signals
            .get(&ticker.to_ascii_uppercase())
            .map(|list| {
                list.iter()
                    .filter(|s| s.created_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }
}
