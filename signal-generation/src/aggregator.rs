// Signal Aggregator
// Fans out to the three sources, normalizes each reading and blends them into a composite

use super::config::SignalsConfig;
use super::sources::{
    AnalystConsensus, AnalystFeed, AnalystReading, MarketDataFeed, NewsSentiment, RsiSignal,
    SentimentFeed, SentimentReading, TechnicalIndicators, TechnicalReading, TrendSignal,
};
use super::storage::{Signal, SignalSource, SignalStore};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use common::{Recommendation, SignalSummary};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SENTIMENT_WEIGHT: f64 = 0.3;
const TECHNICAL_WEIGHT: f64 = 0.4;
const ANALYST_WEIGHT: f64 = 0.3;

/// Longest look-back `get_recent` honours
const MAX_RECENT_HOURS: i64 = 24 * 365;

/// Normalized social-sentiment source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentSignal {
    pub mentions: u32,
    pub sentiment: f64,
    /// 0..1, saturating at ten mentions
    pub popularity: f64,
    pub top_post: Option<serde_json::Value>,
}

impl From<SentimentReading> for SentimentSignal {
    fn from(reading: SentimentReading) -> Self {
        Self {
            mentions: reading.mention_count,
            sentiment: reading.sentiment_score.clamp(-1.0, 1.0),
            popularity: (reading.mention_count as f64 / 10.0).min(1.0),
            top_post: reading.top_post,
        }
    }
}

impl SentimentSignal {
    fn strength(&self) -> f64 {
        (self.popularity * self.sentiment.abs()).min(1.0)
    }
}

/// Normalized market-data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalSignal {
    pub price: Option<f64>,
    pub price_change_pct: f64,
    pub volume_surge: f64,
    /// Mean of the indicator votes, -1..1
    pub technical_sentiment: f64,
    /// (positive - negative) / total headlines, -1..1
    pub news_sentiment: f64,
    pub news_count: usize,
    pub indicators: TechnicalIndicators,
}

impl From<TechnicalReading> for TechnicalSignal {
    fn from(reading: TechnicalReading) -> Self {
        let indicators = reading.indicators;
        let votes: Vec<f64> = [
            match indicators.rsi_signal {
                RsiSignal::Oversold => Some(1.0),
                RsiSignal::Overbought => Some(-1.0),
                RsiSignal::Neutral => None,
            },
            trend_vote(indicators.macd_signal),
            trend_vote(indicators.ma_signal),
        ]
        .into_iter()
        .flatten()
        .collect();

        let technical_sentiment = if votes.is_empty() {
            0.0
        } else {
            votes.iter().sum::<f64>() / votes.len() as f64
        };

        let news_count = reading.news.len();
        let positive = reading
            .news
            .iter()
            .filter(|n| n.sentiment == NewsSentiment::Positive)
            .count();
        let negative = reading
            .news
            .iter()
            .filter(|n| n.sentiment == NewsSentiment::Negative)
            .count();
        let news_sentiment = if news_count > 0 {
            (positive as f64 - negative as f64) / news_count as f64
        } else {
            0.0
        };

        Self {
            price: reading.current_price,
            price_change_pct: reading.price_change_pct,
            volume_surge: reading.volume_surge.max(0.0),
            technical_sentiment,
            news_sentiment,
            news_count,
            indicators,
        }
    }
}

fn trend_vote(signal: TrendSignal) -> Option<f64> {
    match signal {
        TrendSignal::Bullish => Some(1.0),
        TrendSignal::Bearish => Some(-1.0),
        TrendSignal::Neutral => None,
    }
}

impl TechnicalSignal {
    /// Technical indicators weigh 60%, headlines 40%.
    fn combined_sentiment(&self) -> f64 {
        self.technical_sentiment * 0.6 + self.news_sentiment * 0.4
    }

    fn volume_strength(&self) -> f64 {
        (self.volume_surge / 2.0).min(1.0)
    }

    fn strength(&self) -> f64 {
        (self.volume_strength() + self.technical_sentiment.abs()) / 2.0
    }
}

/// Normalized analyst source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystSignal {
    pub consensus: AnalystConsensus,
    pub consensus_score: f64,
    pub price_target: Option<f64>,
    pub upside_pct: Option<f64>,
    pub smart_money: String,
}

impl From<AnalystReading> for AnalystSignal {
    fn from(reading: AnalystReading) -> Self {
        Self {
            consensus: reading.consensus,
            consensus_score: reading.consensus.score(),
            price_target: reading.price_target,
            upside_pct: reading.upside_pct,
            smart_money: reading.smart_money.unwrap_or_else(|| "neutral".to_string()),
        }
    }
}

/// Weighted blend of whatever sources answered for one ticker.
/// Computed on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeSignal {
    pub ticker: String,
    pub sentiment: Option<SentimentSignal>,
    pub technical: Option<TechnicalSignal>,
    pub analyst: Option<AnalystSignal>,
    pub composite_sentiment: f64,
    pub signal_strength: f64,
    pub recommendation: Recommendation,
    pub timestamp: DateTime<Utc>,
}

impl CompositeSignal {
    pub fn from_sources(
        ticker: impl Into<String>,
        sentiment: Option<SentimentSignal>,
        technical: Option<TechnicalSignal>,
        analyst: Option<AnalystSignal>,
    ) -> Self {
        let composite_sentiment =
            composite_sentiment(sentiment.as_ref(), technical.as_ref(), analyst.as_ref());
        let signal_strength =
            signal_strength(sentiment.as_ref(), technical.as_ref(), analyst.as_ref());

        Self {
            ticker: ticker.into(),
            sentiment,
            technical,
            analyst,
            composite_sentiment,
            signal_strength,
            recommendation: recommend(composite_sentiment, signal_strength),
            timestamp: Utc::now(),
        }
    }

    pub fn sources_available(&self) -> usize {
        [
            self.sentiment.is_some(),
            self.technical.is_some(),
            self.analyst.is_some(),
        ]
        .iter()
        .filter(|available| **available)
        .count()
    }

    pub fn current_price(&self) -> Option<f64> {
        self.technical.as_ref().and_then(|t| t.price)
    }

    pub fn summary(&self) -> SignalSummary {
        SignalSummary {
            ticker: self.ticker.clone(),
            composite_sentiment: self.composite_sentiment,
            signal_strength: self.signal_strength,
            recommendation: self.recommendation,
        }
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Weighted mean over the available sources, -1..1.
///
/// The sentiment weight is scaled by popularity. Missing sources drop out and
/// the remaining weights are renormalized.
pub fn composite_sentiment(
    sentiment: Option<&SentimentSignal>,
    technical: Option<&TechnicalSignal>,
    analyst: Option<&AnalystSignal>,
) -> f64 {
    let mut total_weight = 0.0;
    let mut weighted = 0.0;

    if let Some(s) = sentiment {
        let weight = SENTIMENT_WEIGHT * s.popularity;
        weighted += s.sentiment * weight;
        total_weight += weight;
    }
    if let Some(t) = technical {
        weighted += t.combined_sentiment() * TECHNICAL_WEIGHT;
        total_weight += TECHNICAL_WEIGHT;
    }
    if let Some(a) = analyst {
        weighted += a.consensus_score * ANALYST_WEIGHT;
        total_weight += ANALYST_WEIGHT;
    }

    if total_weight <= 0.0 {
        return 0.0;
    }
    round3(weighted / total_weight)
}

/// Mean per-source confidence, 0..1.
pub fn signal_strength(
    sentiment: Option<&SentimentSignal>,
    technical: Option<&TechnicalSignal>,
    analyst: Option<&AnalystSignal>,
) -> f64 {
    let strengths: Vec<f64> = [
        sentiment.map(SentimentSignal::strength),
        technical.map(TechnicalSignal::strength),
        analyst.map(|a| a.consensus_score.abs()),
    ]
    .into_iter()
    .flatten()
    .collect();

    if strengths.is_empty() {
        return 0.0;
    }
    round3(strengths.iter().sum::<f64>() / strengths.len() as f64)
}

/// Map a composite onto a discrete recommendation.
pub fn recommend(sentiment: f64, strength: f64) -> Recommendation {
    if strength < 0.3 {
        return Recommendation::Hold;
    }

    if sentiment > 0.6 {
        if strength > 0.7 {
            Recommendation::StrongBuy
        } else {
            Recommendation::Buy
        }
    } else if sentiment > 0.2 {
        if strength > 0.6 {
            Recommendation::Buy
        } else {
            Recommendation::Hold
        }
    } else if sentiment < -0.6 {
        if strength > 0.7 {
            Recommendation::StrongSell
        } else {
            Recommendation::Sell
        }
    } else if sentiment < -0.2 {
        if strength > 0.6 {
            Recommendation::Sell
        } else {
            Recommendation::Hold
        }
    } else {
        Recommendation::Hold
    }
}

/// Collects, blends and records signals for tickers
pub struct SignalAggregator {
    sentiment_feed: Arc<dyn SentimentFeed>,
    market_feed: Arc<dyn MarketDataFeed>,
    analyst_feed: Arc<dyn AnalystFeed>,
    store: Arc<dyn SignalStore>,
    config: SignalsConfig,
}

impl SignalAggregator {
    pub fn new(
        sentiment_feed: Arc<dyn SentimentFeed>,
        market_feed: Arc<dyn MarketDataFeed>,
        analyst_feed: Arc<dyn AnalystFeed>,
        store: Arc<dyn SignalStore>,
        config: SignalsConfig,
    ) -> Self {
        Self {
            sentiment_feed,
            market_feed,
            analyst_feed,
            store,
            config,
        }
    }

    pub fn config(&self) -> &SignalsConfig {
        &self.config
    }

    /// Aggregate all sources for one ticker.
    ///
    /// Never fails: a source that errors or times out is treated as
    /// unavailable, and a storage failure is only logged.
    pub async fn aggregate(&self, ticker: &str) -> CompositeSignal {
        let ticker = ticker.trim().to_ascii_uppercase();
        let limit = self.config.source_timeout();
        info!(ticker = %ticker, "Aggregating signals");

        let (sentiment, technical, analyst) = tokio::join!(
            guarded(
                SignalSource::Sentiment,
                &ticker,
                limit,
                self.sentiment_feed.ticker_sentiment(&ticker)
            ),
            guarded(
                SignalSource::Technical,
                &ticker,
                limit,
                self.market_feed.ticker_snapshot(&ticker)
            ),
            guarded(
                SignalSource::Analyst,
                &ticker,
                limit,
                self.analyst_feed.ticker_analysis(&ticker)
            ),
        );

        let composite = CompositeSignal::from_sources(
            ticker.clone(),
            sentiment.map(SentimentSignal::from),
            technical.map(TechnicalSignal::from),
            analyst.map(AnalystSignal::from),
        );

        self.persist(&composite).await;

        info!(
            ticker = %ticker,
            sentiment = composite.composite_sentiment,
            strength = composite.signal_strength,
            recommendation = %composite.recommendation,
            sources = composite.sources_available(),
            "Aggregated signals"
        );
        composite
    }

    /// Aggregate several tickers with bounded concurrency, preserving order.
    pub async fn aggregate_many(&self, tickers: &[String]) -> Vec<CompositeSignal> {
        let concurrency = self.config.max_concurrent_tickers.max(1);
        let futures: Vec<_> = tickers.iter().map(|ticker| self.aggregate(ticker)).collect();
        stream::iter(futures)
            .buffered(concurrency)
            .collect()
            .await
    }

    /// Trending tickers from the sentiment source; empty when it is down.
    pub async fn trending_tickers(&self, limit: usize) -> Vec<String> {
        let fetch = self.sentiment_feed.trending_tickers(limit);
        match tokio::time::timeout(self.config.source_timeout(), fetch).await {
            Ok(Ok(tickers)) => tickers,
            Ok(Err(e)) => {
                warn!("Trending tickers unavailable: {:#}", e);
                Vec::new()
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.source_timeout_secs,
                    "Trending tickers request timed out"
                );
                Vec::new()
            }
        }
    }

    /// Persisted, unexpired signals for a ticker from the last `hours_back` hours.
    pub async fn get_recent(&self, ticker: &str, hours_back: i64) -> Result<Vec<Signal>> {
        let now = Utc::now();
        let since = now - Duration::hours(hours_back.clamp(0, MAX_RECENT_HOURS));
        let signals = self
            .store
            .by_ticker_since(&ticker.trim().to_ascii_uppercase(), since)
            .await?;
        Ok(signals.into_iter().filter(|s| s.is_active(now)).collect())
    }

    async fn persist(&self, composite: &CompositeSignal) {
        let ttl = self.config.signal_ttl();
        let ticker = &composite.ticker;
        let mut rows = Vec::new();

        if let Some(s) = &composite.sentiment {
            rows.push(Signal::new(
                ticker.clone(),
                SignalSource::Sentiment,
                s.sentiment,
                s.popularity,
                serde_json::to_value(s).unwrap_or_default(),
                ttl,
            ));
        }
        if let Some(t) = &composite.technical {
            rows.push(Signal::new(
                ticker.clone(),
                SignalSource::Technical,
                (t.technical_sentiment + t.news_sentiment) / 2.0,
                t.volume_strength(),
                serde_json::to_value(t).unwrap_or_default(),
                ttl,
            ));
        }
        if let Some(a) = &composite.analyst {
            rows.push(Signal::new(
                ticker.clone(),
                SignalSource::Analyst,
                a.consensus_score,
                a.consensus_score.abs(),
                serde_json::to_value(a).unwrap_or_default(),
                ttl,
            ));
        }

        for row in &rows {
            if let Err(e) = self.store.store(row).await {
                warn!(ticker = %ticker, source = %row.source, "Failed to store signal: {:#}", e);
            }
        }
        debug!(ticker = %ticker, stored = rows.len(), "Saved signals");
    }
}

/// Run one source fetch under a deadline, turning any failure into `None`.
async fn guarded<T, F>(
    source: SignalSource,
    ticker: &str,
    limit: std::time::Duration,
    fetch: F,
) -> Option<T>
where
    F: Future<Output = Result<Option<T>>>,
{
    match tokio::time::timeout(limit, fetch).await {
        Ok(Ok(reading)) => {
            if reading.is_none() {
                debug!(ticker = %ticker, source = %source, "Source has no data");
            }
            reading
        }
        Ok(Err(e)) => {
            warn!(ticker = %ticker, source = %source, "Signal source failed: {:#}", e);
            None
        }
        Err(_) => {
            warn!(
                ticker = %ticker,
                source = %source,
                timeout_secs = limit.as_secs(),
                "Signal source timed out"
            );
            None
        }
    }
}
