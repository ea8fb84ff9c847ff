// HTTP Signal Feeds
// JSON-over-HTTP adapters for the three signal sources

use super::config::SignalsConfig;
use super::sources::{
    AnalystFeed, AnalystReading, MarketDataFeed, SentimentFeed, SentimentReading,
    TechnicalReading,
};
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

/// Talks to the configured sentiment, market-data and analyst services.
///
/// Each service exposes `GET {base}/tickers/{TICKER}`; the sentiment service
/// additionally serves `GET {base}/trending?limit=N`. A 404 means "no data".
/// A source with no configured base URL is permanently unavailable.
pub struct HttpSignalFeeds {
    client: Client,
    sentiment_url: Option<String>,
    market_data_url: Option<String>,
    analyst_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TrendingEntry {
    Ticker(String),
    Detailed { ticker: String },
}

impl TrendingEntry {
    fn into_ticker(self) -> String {
        match self {
            TrendingEntry::Ticker(t) | TrendingEntry::Detailed { ticker: t } => t,
        }
    }
}

impl HttpSignalFeeds {
    pub fn new(config: &SignalsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.source_timeout())
            .build()
            .context("failed to build signal feed HTTP client")?;

        Ok(Self {
            client,
            sentiment_url: config.sentiment_url.clone(),
            market_data_url: config.market_data_url.clone(),
            analyst_url: config.analyst_url.clone(),
        })
    }

    async fn fetch_ticker<T: DeserializeOwned>(
        &self,
        base: Option<&str>,
        source: &str,
        ticker: &str,
    ) -> Result<Option<T>> {
        let Some(base) = base else {
            debug!(source, "No endpoint configured");
            return Ok(None);
        };

        let url = format!("{}/tickers/{}", base.trim_end_matches('/'), ticker);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("{} request failed", source))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("{} API error: {}", source, response.status()));
        }

        let reading = response
            .json::<T>()
            .await
            .with_context(|| format!("{} returned malformed JSON", source))?;
        Ok(Some(reading))
    }
}

#[async_trait::async_trait]
impl SentimentFeed for HttpSignalFeeds {
    async fn ticker_sentiment(&self, ticker: &str) -> Result<Option<SentimentReading>> {
        self.fetch_ticker(self.sentiment_url.as_deref(), "sentiment", ticker)
            .await
    }

    async fn trending_tickers(&self, limit: usize) -> Result<Vec<String>> {
        let Some(base) = self.sentiment_url.as_deref() else {
            return Ok(Vec::new());
        };

        let url = format!("{}/trending", base.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .query(&[("limit", limit)])
            .send()
            .await
            .context("trending request failed")?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("sentiment API error: {}", response.status()));
        }

        let entries: Vec<TrendingEntry> = response.json().await?;
        Ok(entries
            .into_iter()
            .map(TrendingEntry::into_ticker)
            .map(|t| t.to_ascii_uppercase())
            .take(limit)
            .collect())
    }
}

#[async_trait::async_trait]
impl MarketDataFeed for HttpSignalFeeds {
    async fn ticker_snapshot(&self, ticker: &str) -> Result<Option<TechnicalReading>> {
        self.fetch_ticker(self.market_data_url.as_deref(), "market data", ticker)
            .await
    }
}

#[async_trait::async_trait]
impl AnalystFeed for HttpSignalFeeds {
    async fn ticker_analysis(&self, ticker: &str) -> Result<Option<AnalystReading>> {
        self.fetch_ticker(self.analyst_url.as_deref(), "analyst", ticker)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_sources_are_unavailable() {
        let feeds = HttpSignalFeeds::new(&SignalsConfig::default()).unwrap();
        assert!(feeds.ticker_sentiment("AAPL").await.unwrap().is_none());
        assert!(feeds.ticker_snapshot("AAPL").await.unwrap().is_none());
        assert!(feeds.ticker_analysis("AAPL").await.unwrap().is_none());
        assert!(feeds.trending_tickers(10).await.unwrap().is_empty());
    }

    #[test]
    fn test_trending_payload_shapes() {
        let entries: Vec<TrendingEntry> =
            serde_json::from_str(r#"["gme", {"ticker": "AMC", "mentions": 40}]"#).unwrap();
        let tickers: Vec<String> = entries.into_iter().map(TrendingEntry::into_ticker).collect();
        assert_eq!(tickers, vec!["gme", "AMC"]);
    }
}
