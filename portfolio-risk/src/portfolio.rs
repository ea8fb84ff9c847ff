//! Portfolio state assembly and daily snapshots

use crate::snapshot::{PortfolioSnapshot, SnapshotStore};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use common::PortfolioState;
use execution::Broker;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds `PortfolioState` from live brokerage data plus the snapshot history.
///
/// The tracker owns no positions itself; the brokerage is the source of truth
/// and every call re-queries it.
#[derive(Clone)]
pub struct PortfolioTracker {
    broker: Arc<dyn Broker>,
    snapshots: Arc<dyn SnapshotStore>,
    initial_capital: f64,
    market_tz: Tz,
}

impl PortfolioTracker {
    pub fn new(
        broker: Arc<dyn Broker>,
        snapshots: Arc<dyn SnapshotStore>,
        initial_capital: f64,
        market_tz: Tz,
    ) -> Self {
        Self {
            broker,
            snapshots,
            initial_capital,
            market_tz,
        }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Calendar date of the trading day containing `now`.
    pub fn trading_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.market_tz).date_naive()
    }

    pub async fn current_state(&self) -> anyhow::Result<PortfolioState> {
        self.state_at(Utc::now()).await
    }

    pub async fn state_at(&self, now: DateTime<Utc>) -> anyhow::Result<PortfolioState> {
        let balance = self
            .broker
            .get_balance()
            .await
            .with_context(|| format!("{} broker: balance query failed", self.broker.name()))?;
        let positions = self
            .broker
            .get_positions()
            .await
            .with_context(|| format!("{} broker: positions query failed", self.broker.name()))?;

        let holdings_value: f64 = positions.iter().map(|p| p.market_value).sum();
        let total_value = balance.cash_balance + holdings_value;

        let baseline = self.start_of_day_value(self.trading_date(now)).await;
        let daily_pnl = total_value - baseline;
        let daily_pnl_pct = if baseline > 0.0 {
            daily_pnl / baseline * 100.0
        } else {
            0.0
        };

        let total_pnl = total_value - self.initial_capital;
        let total_pnl_pct = if self.initial_capital > 0.0 {
            total_pnl / self.initial_capital * 100.0
        } else {
            0.0
        };

        debug!(
            total_value = total_value,
            cash = balance.cash_balance,
            positions = positions.len(),
            daily_pnl_pct = daily_pnl_pct,
            "Portfolio state assembled"
        );

        Ok(PortfolioState {
            timestamp: now,
            cash_balance: balance.cash_balance,
            holdings_value,
            total_value,
            positions,
            daily_pnl,
            daily_pnl_pct,
            total_pnl,
            total_pnl_pct,
        })
    }

    /// Baseline for daily P/L: today's recorded opening value, else the
    /// previous snapshot's close, else initial capital.
    async fn start_of_day_value(&self, date: NaiveDate) -> f64 {
        match self.snapshots.get(date).await {
            Ok(Some(today)) => return today.opening_value,
            Ok(None) => {}
            Err(e) => warn!(date = %date, "Snapshot lookup failed, using initial capital: {}", e),
        }

        match self.snapshots.latest_before(date).await {
            Ok(Some(previous)) => previous.total_value,
            Ok(None) => self.initial_capital,
            Err(e) => {
                warn!(date = %date, "Snapshot lookup failed, using initial capital: {}", e);
                self.initial_capital
            }
        }
    }

    /// Create or update today's snapshot.
    pub async fn save_snapshot(&self) -> anyhow::Result<PortfolioSnapshot> {
        self.save_snapshot_at(Utc::now()).await
    }

    pub async fn save_snapshot_at(&self, now: DateTime<Utc>) -> anyhow::Result<PortfolioSnapshot> {
        let state = self.state_at(now).await?;
        let date = self.trading_date(now);

        let existing = self
            .snapshots
            .get(date)
            .await
            .context("failed to read existing snapshot")?;
        let opening_value = match &existing {
            Some(snapshot) => snapshot.opening_value,
            None => state.total_value - state.daily_pnl,
        };

        let snapshot = PortfolioSnapshot {
            snapshot_date: date,
            opening_value,
            total_value: state.total_value,
            cash_balance: state.cash_balance,
            holdings_value: state.holdings_value,
            daily_pnl: state.daily_pnl,
            daily_pnl_pct: state.daily_pnl_pct,
            total_pnl: state.total_pnl,
            total_pnl_pct: state.total_pnl_pct,
            positions: state.positions,
            updated_at: now,
        };

        self.snapshots
            .upsert(&snapshot)
            .await
            .context("failed to persist snapshot")?;

        if existing.is_some() {
            info!(date = %date, total_value = snapshot.total_value, "Updated portfolio snapshot");
        } else {
            info!(date = %date, total_value = snapshot.total_value, "Created portfolio snapshot");
        }

        Ok(snapshot)
    }

    pub async fn recent_snapshots(&self, days: usize) -> anyhow::Result<Vec<PortfolioSnapshot>> {
        self.snapshots.recent(days).await
    }

    /// Percent of total value held in each ticker.
    pub fn exposure_by_ticker(state: &PortfolioState) -> BTreeMap<String, f64> {
        if !(state.total_value > 0.0) {
            return BTreeMap::new();
        }
        state
            .positions
            .iter()
            .map(|p| (p.ticker.clone(), p.market_value / state.total_value * 100.0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::InMemorySnapshotStore;
    use chrono::{Duration, TimeZone};
    use common::{OrderRequest, TradeAction};
    use execution::PaperBroker;

    fn tracker(broker: Arc<PaperBroker>, store: Arc<InMemorySnapshotStore>) -> PortfolioTracker {
        PortfolioTracker::new(broker, store, 10_000.0, chrono_tz::America::New_York)
    }

    #[tokio::test]
    async fn test_state_totals_and_baseline() {
        let broker = Arc::new(PaperBroker::with_cash(10_000.0));
        broker.set_price("AAPL", 100.0);
        broker
            .place_order(&OrderRequest::market("AAPL", TradeAction::Buy, 20))
            .await;
        broker.set_price("AAPL", 50.0);

        let t = tracker(broker, Arc::new(InMemorySnapshotStore::new()));
        let state = t.current_state().await.unwrap();

        assert_eq!(state.cash_balance, 8_000.0);
        assert_eq!(state.holdings_value, 1_000.0);
        assert_eq!(state.total_value, 9_000.0);
        assert!((state.daily_pnl_pct + 10.0).abs() < 1e-9);
        assert!((state.total_pnl_pct + 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_snapshot_is_idempotent_per_day() {
        let broker = Arc::new(PaperBroker::with_cash(10_000.0));
        let store = Arc::new(InMemorySnapshotStore::new());
        let t = tracker(broker.clone(), store.clone());

        let now = Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap();
        t.save_snapshot_at(now).await.unwrap();

        broker.set_price("MSFT", 100.0);
        broker
            .place_order(&OrderRequest::market("MSFT", TradeAction::Buy, 10))
            .await;
        broker.set_price("MSFT", 80.0);
        let second = t.save_snapshot_at(now + Duration::hours(3)).await.unwrap();

        assert_eq!(store.count().await, 1);
        assert_eq!(second.opening_value, 10_000.0);
        assert_eq!(second.total_value, 9_800.0);
        assert_eq!(t.recent_snapshots(30).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_baseline_uses_previous_close() {
        let broker = Arc::new(PaperBroker::with_cash(10_000.0));
        let store = Arc::new(InMemorySnapshotStore::new());
        let t = tracker(broker.clone(), store.clone());

        // Friday close
        let friday = Utc.with_ymd_and_hms(2024, 3, 8, 21, 0, 0).unwrap();
        broker.set_price("NVDA", 100.0);
        broker
            .place_order(&OrderRequest::market("NVDA", TradeAction::Buy, 10))
            .await;
        broker.set_price("NVDA", 150.0);
        t.save_snapshot_at(friday).await.unwrap();

        // Monday
        broker.set_price("NVDA", 120.0);
        let monday = Utc.with_ymd_and_hms(2024, 3, 11, 15, 0, 0).unwrap();
        let state = t.state_at(monday).await.unwrap();

        assert_eq!(state.total_value, 10_200.0);
        assert_eq!(state.daily_pnl, -300.0);
    }

    #[test]
    fn test_trading_date_uses_market_timezone() {
        let t = tracker(
            Arc::new(PaperBroker::with_cash(0.0)),
            Arc::new(InMemorySnapshotStore::new()),
        );
        // 02:00 UTC is still the previous evening in New York
        let now = Utc.with_ymd_and_hms(2024, 3, 6, 2, 0, 0).unwrap();
        assert_eq!(t.trading_date(now), NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    }

    #[test]
    fn test_exposure_by_ticker() {
        let state = PortfolioState {
            timestamp: Utc::now(),
            cash_balance: 500.0,
            holdings_value: 500.0,
            total_value: 1000.0,
            positions: vec![common::Position::new("AAPL", 5, 100.0, 100.0)],
            daily_pnl: 0.0,
            daily_pnl_pct: 0.0,
            total_pnl: 0.0,
            total_pnl_pct: 0.0,
        };
        let exposure = PortfolioTracker::exposure_by_ticker(&state);
        assert_eq!(exposure.get("AAPL"), Some(&50.0));
    }
}
