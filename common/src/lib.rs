//! Shared domain types for the trading workspace.
//!
//! Every crate speaks in these types: portfolio snapshots, orders, decision
//! audit records and the error taxonomy used at component boundaries.

mod error;
mod types;

pub use error::{TradingError, TradingResult};
pub use types::{
    Balance, DecisionRecord, DecisionType, OrderRequest, OrderResult, OrderType, PortfolioState,
    PortfolioSummary, Position, Recommendation, SignalSummary, ToolCall, TradeAction,
};

pub use uuid::Uuid;
