//! Brokerage boundary
//!
//! The `Broker` trait is the only way the rest of the system touches an
//! account: balance, positions, quotes and order placement. `PaperBroker`
//! is an in-process simulation used for paper trading and tests.

pub mod broker;
pub mod paper;
pub mod token;
pub mod trade_log;

pub use broker::{usable_price, Broker, BrokerError};
pub use paper::{PaperBroker, PaperBrokerConfig};
pub use token::{AccessToken, AccessTokenCache};
pub use trade_log::{InMemoryTradeLog, TradeLog, TradeRecord, TradeStatus, win_rate_pct};
