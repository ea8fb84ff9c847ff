// Fixed Signal Feeds
// Canned readings for paper trading and tests

use super::sources::{
    AnalystFeed, AnalystReading, MarketDataFeed, SentimentFeed, SentimentReading,
    TechnicalReading,
};
use anyhow::Result;
use std::collections::HashMap;

/// Serves every source from in-memory maps keyed by upper-case ticker
#[derive(Debug, Clone, Default)]
pub struct FixedFeeds {
    sentiment: HashMap<String, SentimentReading>,
    technical: HashMap<String, TechnicalReading>,
    analyst: HashMap<String, AnalystReading>,
    trending: Vec<String>,
    fail_sentiment: bool,
    fail_market_data: bool,
    fail_analyst: bool,
}

impl FixedFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sentiment(mut self, ticker: &str, reading: SentimentReading) -> Self {
        self.sentiment.insert(ticker.to_ascii_uppercase(), reading);
        self
    }

    pub fn with_technical(mut self, ticker: &str, reading: TechnicalReading) -> Self {
        self.technical.insert(ticker.to_ascii_uppercase(), reading);
        self
    }

    pub fn with_analyst(mut self, ticker: &str, reading: AnalystReading) -> Self {
        self.analyst.insert(ticker.to_ascii_uppercase(), reading);
        self
    }

    pub fn with_trending<I, S>(mut self, tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trending = tickers.into_iter().map(Into::into).collect();
        self
    }

    pub fn failing_sentiment(mut self) -> Self {
        self.fail_sentiment = true;
        self
    }

    pub fn failing_market_data(mut self) -> Self {
        self.fail_market_data = true;
        self
    }

    pub fn failing_analyst(mut self) -> Self {
        self.fail_analyst = true;
        self
    }
}

#[async_trait::async_trait]
impl SentimentFeed for FixedFeeds {
    async fn ticker_sentiment(&self, ticker: &str) -> Result<Option<SentimentReading>> {
        if self.fail_sentiment {
            anyhow::bail!("sentiment feed offline");
        }
        Ok(self.sentiment.get(&ticker.to_ascii_uppercase()).cloned())
    }

    async fn trending_tickers(&self, limit: usize) -> Result<Vec<String>> {
        if self.fail_sentiment {
            anyhow::bail!("sentiment feed offline");
        }
        Ok(self.trending.iter().take(limit).cloned().collect())
    }
}

#[async_trait::async_trait]
impl MarketDataFeed for FixedFeeds {
    async fn ticker_snapshot(&self, ticker: &str) -> Result<Option<TechnicalReading>> {
        if self.fail_market_data {
            anyhow::bail!("market data feed offline");
        }
        Ok(self.technical.get(&ticker.to_ascii_uppercase()).cloned())
    }
}

#[async_trait::async_trait]
impl AnalystFeed for FixedFeeds {
    async fn ticker_analysis(&self, ticker: &str) -> Result<Option<AnalystReading>> {
        if self.fail_analyst {
            anyhow::bail!("analyst feed offline");
        }
        Ok(self.analyst.get(&ticker.to_ascii_uppercase()).cloned())
    }
}
