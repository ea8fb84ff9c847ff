// Signal Generation
// Collects per-ticker readings from sentiment, market-data and analyst sources
// and blends them into composite signals for the decision sessions

pub mod aggregator;
pub mod config;
pub mod fixed;
pub mod http;
pub mod sources;
pub mod storage;

pub use aggregator::{
    composite_sentiment, recommend, signal_strength, AnalystSignal, CompositeSignal,
    SentimentSignal, SignalAggregator, TechnicalSignal,
};
pub use config::SignalsConfig;
pub use fixed::FixedFeeds;
pub use http::HttpSignalFeeds;
pub use sources::{
    AnalystConsensus, AnalystFeed, AnalystReading, MarketDataFeed, NewsItem, NewsSentiment,
    RsiSignal, SentimentFeed, SentimentReading, TechnicalIndicators, TechnicalReading,
    TrendSignal,
};
pub use storage::{InMemorySignalStore, Signal, SignalSource, SignalStore};
