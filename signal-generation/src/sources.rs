// Signal Source Interfaces
// Raw per-ticker readings as delivered by the sentiment, market-data and analyst feeds

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Social sentiment for one ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentReading {
    #[serde(default)]
    pub mention_count: u32,
    /// -1 (bearish) to 1 (bullish)
    #[serde(default)]
    pub sentiment_score: f64,
    #[serde(default)]
    pub top_post: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RsiSignal {
    Oversold,
    Overbought,
    #[default]
    #[serde(other)]
    Neutral,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendSignal {
    Bullish,
    Bearish,
    #[default]
    #[serde(other)]
    Neutral,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    #[serde(default)]
    pub rsi_signal: RsiSignal,
    #[serde(default)]
    pub macd_signal: TrendSignal,
    #[serde(default)]
    pub ma_signal: TrendSignal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewsSentiment {
    Positive,
    Negative,
    #[default]
    #[serde(other)]
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub sentiment: NewsSentiment,
}

/// Price action, indicator votes and headlines for one ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalReading {
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub price_change_pct: f64,
    /// Volume relative to its recent average (1.0 = normal)
    #[serde(default = "default_volume_surge")]
    pub volume_surge: f64,
    #[serde(default)]
    pub indicators: TechnicalIndicators,
    #[serde(default)]
    pub news: Vec<NewsItem>,
}

fn default_volume_surge() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnalystConsensus {
    Buy,
    Hold,
    Sell,
    #[default]
    #[serde(other)]
    Unknown,
}

impl AnalystConsensus {
    pub fn score(&self) -> f64 {
        match self {
            AnalystConsensus::Buy => 1.0,
            AnalystConsensus::Sell => -1.0,
            AnalystConsensus::Hold | AnalystConsensus::Unknown => 0.0,
        }
    }
}

/// Analyst consensus for one ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystReading {
    #[serde(default)]
    pub consensus: AnalystConsensus,
    #[serde(default)]
    pub price_target: Option<f64>,
    #[serde(default)]
    pub upside_pct: Option<f64>,
    #[serde(default)]
    pub smart_money: Option<String>,
}

/// `Ok(None)` means the source has nothing for this ticker.
#[async_trait::async_trait]
pub trait SentimentFeed: Send + Sync {
    async fn ticker_sentiment(&self, ticker: &str) -> Result<Option<SentimentReading>>;

    /// Most-mentioned tickers, most popular first
    async fn trending_tickers(&self, limit: usize) -> Result<Vec<String>>;
}

#[async_trait::async_trait]
pub trait MarketDataFeed: Send + Sync {
    async fn ticker_snapshot(&self, ticker: &str) -> Result<Option<TechnicalReading>>;
}

#[async_trait::async_trait]
pub trait AnalystFeed: Send + Sync {
    async fn ticker_analysis(&self, ticker: &str) -> Result<Option<AnalystReading>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_labels_fall_back_to_neutral() {
        let reading: TechnicalReading = serde_json::from_str(
            r#"{"indicators": {"rsi_signal": "mid", "macd_signal": "bullish"},
                "news": [{"title": "x", "sentiment": "mixed"}]}"#,
        )
        .unwrap();

        assert_eq!(reading.indicators.rsi_signal, RsiSignal::Neutral);
        assert_eq!(reading.indicators.macd_signal, TrendSignal::Bullish);
        assert_eq!(reading.news[0].sentiment, NewsSentiment::Neutral);
        assert_eq!(reading.volume_surge, 1.0);
    }

    #[test]
    fn test_consensus_scores() {
        let reading: AnalystReading = serde_json::from_str(r#"{"consensus": "N/A"}"#).unwrap();
        assert_eq!(reading.consensus, AnalystConsensus::Unknown);
        assert_eq!(AnalystConsensus::Buy.score(), 1.0);
        assert_eq!(AnalystConsensus::Sell.score(), -1.0);
    }
}
