//! Brokerage collaborator trait

use async_trait::async_trait;
use common::{Balance, OrderRequest, OrderResult, Position};
use thiserror::Error;

/// Reasons an order or query can be refused by a broker implementation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BrokerError {
    #[error("no quote available for {0}")]
    NoQuote(String),

    #[error("insufficient cash: need {needed:.2}, have {available:.2}")]
    InsufficientCash { needed: f64, available: f64 },

    #[error("insufficient shares of {ticker}: need {needed}, have {held}")]
    InsufficientShares { ticker: String, needed: u64, held: u64 },

    #[error("limit price {limit:.2} not marketable against {market:.2}")]
    LimitNotMarketable { limit: f64, market: f64 },

    #[error("invalid order: {0}")]
    InvalidOrder(String),
}

/// Account access used by the risk, tool and engine layers.
///
/// Quotes and orders never raise: a failed lookup is `None`, a failed order
/// is an `OrderResult` with `success == false`.
#[async_trait]
pub trait Broker: Send + Sync {
    fn name(&self) -> &str;

    async fn get_balance(&self) -> anyhow::Result<Balance>;

    async fn get_positions(&self) -> anyhow::Result<Vec<Position>>;

    /// Latest trade price, `None` when unavailable.
    async fn get_price(&self, ticker: &str) -> Option<f64>;

    async fn place_order(&self, order: &OrderRequest) -> OrderResult;

    /// Replace the access token. Idempotent by replacement.
    async fn refresh_access_token(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Treat zero, negative and non-finite quotes as missing.
pub fn usable_price(price: Option<f64>) -> Option<f64> {
    price.filter(|p| p.is_finite() && *p > 0.0)
}
