//! Paper brokerage: fills orders against an in-memory quote book

use crate::broker::{usable_price, Broker, BrokerError};
use crate::token::{AccessToken, AccessTokenCache};
use async_trait::async_trait;
use chrono::Duration;
use common::{Balance, OrderRequest, OrderResult, OrderType, Position, TradeAction};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperBrokerConfig {
    /// Starting cash balance
    pub starting_cash: f64,

    /// Maximum token age before the refresh job replaces it (hours)
    #[serde(default = "default_token_max_age_hours")]
    pub token_max_age_hours: i64,
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        Self {
            starting_cash: 1_000_000.0,
            token_max_age_hours: default_token_max_age_hours(),
        }
    }
}

fn default_token_max_age_hours() -> i64 {
    22
}

#[derive(Debug, Clone)]
struct Holding {
    quantity: u64,
    avg_cost: f64,
}

#[derive(Debug)]
struct Account {
    cash: f64,
    holdings: HashMap<String, Holding>,
}

/// Simulated brokerage account
pub struct PaperBroker {
    quotes: DashMap<String, f64>,
    account: RwLock<Account>,
    tokens: AccessTokenCache,
    orders_placed: AtomicU64,
}

impl PaperBroker {
    pub fn new(config: PaperBrokerConfig) -> Self {
        Self {
            quotes: DashMap::new(),
            account: RwLock::new(Account {
                cash: config.starting_cash,
                holdings: HashMap::new(),
            }),
            tokens: AccessTokenCache::new(Duration::hours(config.token_max_age_hours)),
            orders_placed: AtomicU64::new(0),
        }
    }

    pub fn with_cash(cash: f64) -> Self {
        Self::new(PaperBrokerConfig {
            starting_cash: cash,
            ..Default::default()
        })
    }

    /// Set the quote used for valuations and fills.
    pub fn set_price(&self, ticker: &str, price: f64) {
        self.quotes.insert(ticker.to_ascii_uppercase(), price);
    }

    pub fn clear_price(&self, ticker: &str) {
        self.quotes.remove(&ticker.to_ascii_uppercase());
    }

    /// Seed a holding directly, bypassing cash.
    pub async fn seed_position(&self, ticker: &str, quantity: u64, avg_cost: f64) {
        let mut account = self.account.write().await;
        account.holdings.insert(
            ticker.to_ascii_uppercase(),
            Holding { quantity, avg_cost },
        );
    }

    pub fn orders_placed(&self) -> u64 {
        self.orders_placed.load(Ordering::Relaxed)
    }

    pub fn tokens(&self) -> &AccessTokenCache {
        &self.tokens
    }

    fn quote(&self, ticker: &str) -> Option<f64> {
        usable_price(self.quotes.get(&ticker.to_ascii_uppercase()).map(|q| *q))
    }

    fn fill_price(&self, order: &OrderRequest) -> Result<f64, BrokerError> {
        let market = self
            .quote(&order.ticker)
            .ok_or_else(|| BrokerError::NoQuote(order.ticker.clone()))?;

        match order.order_type {
            OrderType::Market => Ok(market),
            OrderType::Limit => {
                let limit = order
                    .limit_price
                    .filter(|p| *p > 0.0)
                    .ok_or_else(|| BrokerError::InvalidOrder("LIMIT order without limit price".into()))?;
                let marketable = match order.action {
                    TradeAction::Buy => market <= limit,
                    TradeAction::Sell => market >= limit,
                };
                if marketable {
                    Ok(market)
                } else {
                    Err(BrokerError::LimitNotMarketable { limit, market })
                }
            }
        }
    }

    async fn fill(&self, order: &OrderRequest) -> Result<f64, BrokerError> {
        if order.quantity == 0 {
            return Err(BrokerError::InvalidOrder("quantity must be positive".into()));
        }

        let price = self.fill_price(order)?;
        let ticker = order.ticker.to_ascii_uppercase();
        let notional = price * order.quantity as f64;
        let mut account = self.account.write().await;

        match order.action {
            TradeAction::Buy => {
                if notional > account.cash {
                    return Err(BrokerError::InsufficientCash {
                        needed: notional,
                        available: account.cash,
                    });
                }
                account.cash -= notional;
                let holding = account.holdings.entry(ticker).or_insert(Holding {
                    quantity: 0,
                    avg_cost: 0.0,
                });
                let total_cost = holding.avg_cost * holding.quantity as f64 + notional;
                holding.quantity += order.quantity;
                holding.avg_cost = total_cost / holding.quantity as f64;
            }
            TradeAction::Sell => {
                let held = account.holdings.get(&ticker).map(|h| h.quantity).unwrap_or(0);
                if held < order.quantity {
                    return Err(BrokerError::InsufficientShares {
                        ticker,
                        needed: order.quantity,
                        held,
                    });
                }
                account.cash += notional;
                let remaining = held - order.quantity;
                if remaining == 0 {
                    account.holdings.remove(&ticker);
                } else if let Some(holding) = account.holdings.get_mut(&ticker) {
                    holding.quantity = remaining;
                }
            }
        }

        Ok(price)
    }
}

#[async_trait]
impl Broker for PaperBroker {
    fn name(&self) -> &str {
        "paper"
    }

    async fn get_balance(&self) -> anyhow::Result<Balance> {
        let account = self.account.read().await;
        let holdings: f64 = account
            .holdings
            .iter()
            .map(|(ticker, h)| h.quantity as f64 * self.quote(ticker).unwrap_or(h.avg_cost))
            .sum();

        Ok(Balance {
            cash_balance: account.cash,
            total_value: account.cash + holdings,
        })
    }

    async fn get_positions(&self) -> anyhow::Result<Vec<Position>> {
        let account = self.account.read().await;
        let mut positions: Vec<Position> = account
            .holdings
            .iter()
            .map(|(ticker, h)| {
                let price = self.quote(ticker).unwrap_or(h.avg_cost);
                Position::new(ticker.clone(), h.quantity, h.avg_cost, price)
            })
            .collect();
        positions.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        Ok(positions)
    }

    async fn get_price(&self, ticker: &str) -> Option<f64> {
        self.quote(ticker)
    }

    async fn place_order(&self, order: &OrderRequest) -> OrderResult {
        self.orders_placed.fetch_add(1, Ordering::Relaxed);

        match self.fill(order).await {
            Ok(price) => {
                let order_id = format!("PAPER-{}", &Uuid::new_v4().simple().to_string()[..12]);
                info!(
                    ticker = %order.ticker,
                    action = %order.action,
                    quantity = order.quantity,
                    price = price,
                    order_id = %order_id,
                    "Paper order filled"
                );
                OrderResult::filled(order_id)
            }
            Err(e) => {
                warn!(ticker = %order.ticker, action = %order.action, "Paper order rejected: {}", e);
                OrderResult::rejected(e.to_string())
            }
        }
    }

    async fn refresh_access_token(&self) -> anyhow::Result<()> {
        let token = AccessToken::new(format!("paper-{}", Uuid::new_v4().simple()));
        self.tokens.replace(token).await;
        debug!("Paper broker token refreshed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_buy_then_sell_round_trip() {
        let broker = PaperBroker::with_cash(10_000.0);
        broker.set_price("AAPL", 100.0);

        let buy = broker
            .place_order(&OrderRequest::market("AAPL", TradeAction::Buy, 10))
            .await;
        assert!(buy.success);

        let balance = broker.get_balance().await.unwrap();
        assert_eq!(balance.cash_balance, 9_000.0);
        assert_eq!(balance.total_value, 10_000.0);

        broker.set_price("AAPL", 120.0);
        let sell = broker
            .place_order(&OrderRequest::market("AAPL", TradeAction::Sell, 10))
            .await;
        assert!(sell.success);
        assert!(broker.get_positions().await.unwrap().is_empty());
        assert_eq!(broker.get_balance().await.unwrap().cash_balance, 10_200.0);
    }

    #[tokio::test]
    async fn test_rejects_without_quote_or_cash() {
        let broker = PaperBroker::with_cash(500.0);
        let result = broker
            .place_order(&OrderRequest::market("MSFT", TradeAction::Buy, 1))
            .await;
        assert!(!result.success);

        broker.set_price("MSFT", 400.0);
        let result = broker
            .place_order(&OrderRequest::market("MSFT", TradeAction::Buy, 2))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("insufficient cash"));
        assert_eq!(broker.orders_placed(), 2);
    }

    #[tokio::test]
    async fn test_average_cost_updates() {
        let broker = PaperBroker::with_cash(10_000.0);
        broker.set_price("TSLA", 100.0);
        broker.place_order(&OrderRequest::market("TSLA", TradeAction::Buy, 10)).await;
        broker.set_price("TSLA", 200.0);
        broker.place_order(&OrderRequest::market("TSLA", TradeAction::Buy, 10)).await;

        let positions = broker.get_positions().await.unwrap();
        assert_eq!(positions[0].quantity, 20);
        assert_eq!(positions[0].avg_cost, 150.0);
    }

    #[tokio::test]
    async fn test_limit_order_marketability() {
        let broker = PaperBroker::with_cash(10_000.0);
        broker.set_price("AMD", 150.0);

        let mut order = OrderRequest::market("AMD", TradeAction::Buy, 1);
        order.order_type = OrderType::Limit;
        order.limit_price = Some(140.0);
        assert!(!broker.place_order(&order).await.success);

        order.limit_price = Some(155.0);
        assert!(broker.place_order(&order).await.success);
    }

    #[tokio::test]
    async fn test_token_refresh_replaces_token() {
        let broker = PaperBroker::with_cash(1.0);
        assert!(broker.tokens().current().await.is_none());
        broker.refresh_access_token().await.unwrap();
        let first = broker.tokens().current().await.unwrap();
        broker.refresh_access_token().await.unwrap();
        let second = broker.tokens().current().await.unwrap();
        assert_ne!(first.value, second.value);
    }
}
