//! Application context
//!
//! Every long-lived collaborator is built once at startup and handed to the
//! trading engine and scheduler through this struct. Nothing lives in globals.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use audit::PgStore;
use decision_engine::{
    DecisionEngine, DecisionLog, InMemoryDecisionLog, LlmClient, OpenAiCompatibleClient,
    TradingFunctions, UnavailableLlm,
};
use execution::{Broker, InMemoryTradeLog, PaperBroker, TradeLog};
use portfolio_risk::{
    load_limits, InMemorySnapshotStore, PortfolioTracker, RiskLimits, RiskManager, SnapshotStore,
};
use signal_generation::{HttpSignalFeeds, InMemorySignalStore, SignalAggregator, SignalStore};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Storage handles behind the append-record interfaces
#[derive(Clone)]
pub struct Stores {
    pub signals: Arc<dyn SignalStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub trades: Arc<dyn TradeLog>,
    pub decisions: Arc<dyn DecisionLog>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            signals: Arc::new(InMemorySignalStore::new()),
            snapshots: Arc::new(InMemorySnapshotStore::new()),
            trades: Arc::new(InMemoryTradeLog::new()),
            decisions: Arc::new(InMemoryDecisionLog::new()),
        }
    }

    pub fn postgres(store: PgStore) -> Self {
        Self {
            signals: Arc::new(store.clone()),
            snapshots: Arc::new(store.clone()),
            trades: Arc::new(store.clone()),
            decisions: Arc::new(store),
        }
    }
}

pub struct AppContext {
    pub config: AppConfig,
    pub broker: Arc<dyn Broker>,
    pub tracker: PortfolioTracker,
    pub signals: Arc<SignalAggregator>,
    pub trades: Arc<dyn TradeLog>,
    pub decisions: Arc<dyn DecisionLog>,
    pub decision_engine: DecisionEngine,
    risk_limits: watch::Sender<RiskLimits>,
}

impl AppContext {
    /// Assemble the context from already-built collaborators.
    pub fn new(
        config: AppConfig,
        broker: Arc<dyn Broker>,
        signals: Arc<SignalAggregator>,
        stores: Stores,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let tracker = PortfolioTracker::new(
            broker.clone(),
            stores.snapshots.clone(),
            config.risk.initial_capital,
            config.scheduler.market_tz,
        );
        let decision_engine = DecisionEngine::new(llm, config.llm.clone());
        let (risk_limits, _) = watch::channel(config.risk.limits);

        Self {
            broker,
            tracker,
            signals,
            trades: stores.trades,
            decisions: stores.decisions,
            decision_engine,
            risk_limits,
            config,
        }
    }

    /// Build the production context: paper brokerage, HTTP signal feeds,
    /// PostgreSQL when configured and the OpenAI-compatible decision model.
    pub async fn build(config: AppConfig) -> Result<Self> {
        let broker: Arc<dyn Broker> = Arc::new(PaperBroker::new(config.broker.clone()));

        let stores = match &config.storage.database_url {
            Some(url) => {
                let store = PgStore::connect(url, config.storage.max_connections)
                    .await
                    .context("Failed to connect to PostgreSQL")?;
                store.initialize().await?;
                Stores::postgres(store)
            }
            None => {
                warn!("No database_url configured, audit records are kept in memory only");
                Stores::in_memory()
            }
        };

        let feeds = Arc::new(HttpSignalFeeds::new(&config.signals)?);
        let signals = Arc::new(SignalAggregator::new(
            feeds.clone(),
            feeds.clone(),
            feeds,
            stores.signals.clone(),
            config.signals.clone(),
        ));

        let llm: Arc<dyn LlmClient> = match OpenAiCompatibleClient::from_config(&config.llm) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                warn!("Decision model unavailable: {:#}", e);
                Arc::new(UnavailableLlm::new(format!("{:#}", e)))
            }
        };

        let context = Self::new(config, broker, signals, stores, llm);
        if context.config.storage.risk_limits_path.is_some() {
            context.reload_risk_limits()?;
        }

        info!(
            broker = context.broker.name(),
            model = context.decision_engine.model_name(),
            "Application context ready"
        );
        Ok(context)
    }

    /// The limits in force right now. Sessions take one copy at their start.
    pub fn risk_limits(&self) -> RiskLimits {
        *self.risk_limits.borrow()
    }

    pub fn subscribe_risk_limits(&self) -> watch::Receiver<RiskLimits> {
        self.risk_limits.subscribe()
    }

    pub fn update_risk_limits(&self, limits: RiskLimits) -> Result<()> {
        limits.validate()?;
        self.risk_limits.send_replace(limits);
        info!(
            max_position_size_pct = limits.max_position_size_pct,
            daily_loss_limit_pct = limits.daily_loss_limit_pct,
            stop_loss_pct = limits.stop_loss_pct,
            "Risk limits updated"
        );
        Ok(())
    }

    /// Re-read the risk limits file named in the storage config.
    pub fn reload_risk_limits(&self) -> Result<RiskLimits> {
        let path = self
            .config
            .storage
            .risk_limits_path
            .as_deref()
            .context("storage.risk_limits_path is not set")?;
        let limits = load_limits(path)?;
        self.update_risk_limits(limits)?;
        Ok(limits)
    }

    /// Tool surface for one session, bound to the given limits.
    pub fn trading_functions(&self, limits: RiskLimits) -> TradingFunctions {
        TradingFunctions::new(
            self.tracker.clone(),
            RiskManager::new(limits),
            self.signals.clone(),
            self.trades.clone(),
        )
    }
}
