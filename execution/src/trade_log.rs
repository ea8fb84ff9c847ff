//! Append-only record of every order the system placed

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderType, TradeAction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Filled,
    Rejected,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Filled => "FILLED",
            TradeStatus::Rejected => "REJECTED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub ticker: String,
    pub action: TradeAction,
    pub quantity: u64,
    pub price: f64,
    pub total_value: f64,
    pub order_type: OrderType,
    pub status: TradeStatus,
    pub order_id: Option<String>,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn is_filled(&self) -> bool {
        self.status == TradeStatus::Filled
    }
}

#[async_trait]
pub trait TradeLog: Send + Sync {
    async fn append(&self, record: TradeRecord) -> anyhow::Result<()>;

    /// Trades executed at or after `cutoff`, newest first.
    async fn since(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<TradeRecord>>;
}

#[derive(Default)]
pub struct InMemoryTradeLog {
    records: RwLock<Vec<TradeRecord>>,
}

impl InMemoryTradeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl TradeLog for InMemoryTradeLog {
    async fn append(&self, record: TradeRecord) -> anyhow::Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn since(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<TradeRecord>> {
        let records = self.records.read().await;
        let mut recent: Vec<TradeRecord> = records
            .iter()
            .filter(|r| r.executed_at >= cutoff)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        Ok(recent)
    }
}

/// Percentage of filled sells priced above the preceding filled buy of the
/// same ticker. Sells with no earlier buy in `trades` are ignored.
pub fn win_rate_pct(trades: &[TradeRecord]) -> f64 {
    let mut filled: Vec<&TradeRecord> = trades.iter().filter(|t| t.is_filled()).collect();
    filled.sort_by_key(|t| t.executed_at);

    let mut last_buy: HashMap<&str, f64> = HashMap::new();
    let (mut wins, mut closed) = (0u32, 0u32);

    for trade in filled {
        match trade.action {
            TradeAction::Buy => {
                last_buy.insert(trade.ticker.as_str(), trade.price);
            }
            TradeAction::Sell => {
                if let Some(buy_price) = last_buy.get(trade.ticker.as_str()) {
                    closed += 1;
                    if trade.price > *buy_price {
                        wins += 1;
                    }
                }
            }
        }
    }

    if closed == 0 {
        0.0
    } else {
        wins as f64 / closed as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn trade(ticker: &str, action: TradeAction, price: f64, minutes_ago: i64) -> TradeRecord {
        TradeRecord {
            id: Uuid::new_v4(),
            ticker: ticker.to_string(),
            action,
            quantity: 1,
            price,
            total_value: price,
            order_type: OrderType::Market,
            status: TradeStatus::Filled,
            order_id: Some("PAPER-1".to_string()),
            error: None,
            executed_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_win_rate_pairs_sells_with_prior_buys() {
        let trades = vec![
            trade("AAPL", TradeAction::Buy, 100.0, 50),
            trade("AAPL", TradeAction::Sell, 110.0, 40),
            trade("MSFT", TradeAction::Buy, 300.0, 30),
            trade("MSFT", TradeAction::Sell, 290.0, 20),
            trade("NVDA", TradeAction::Sell, 500.0, 10),
        ];
        assert_eq!(win_rate_pct(&trades), 50.0);
    }

    #[test]
    fn test_win_rate_ignores_rejected() {
        let mut buy = trade("AMD", TradeAction::Buy, 100.0, 20);
        buy.status = TradeStatus::Rejected;
        let trades = vec![buy, trade("AMD", TradeAction::Sell, 120.0, 10)];
        assert_eq!(win_rate_pct(&trades), 0.0);
    }

    #[tokio::test]
    async fn test_since_filters_and_orders() {
        let log = InMemoryTradeLog::new();
        log.append(trade("OLD", TradeAction::Buy, 1.0, 60 * 24 * 10)).await.unwrap();
        log.append(trade("A", TradeAction::Buy, 1.0, 30)).await.unwrap();
        log.append(trade("B", TradeAction::Buy, 1.0, 5)).await.unwrap();

        let recent = log.since(Utc::now() - Duration::days(7)).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].ticker, "B");
        assert_eq!(log.len().await, 3);
    }
}
