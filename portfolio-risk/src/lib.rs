//! Portfolio & Risk Management
//!
//! This crate turns brokerage queries into a `PortfolioState`, keeps one
//! snapshot per trading day for the daily P/L baseline, and evaluates the
//! three hard risk limits:
//!
//! - maximum position concentration per ticker
//! - daily-loss circuit breaker
//! - per-position stop-loss
//!
//! plus the confidence-scaled position sizing used before every BUY.

mod config;
mod portfolio;
mod risk;
mod snapshot;

pub use config::{load_limits, save_limits, RiskConfig, RiskLimits};
pub use portfolio::PortfolioTracker;
pub use risk::{
    DailyLossCheck, PositionSize, RiskManager, RiskViolation, StopLossCheck, StopLossTrigger,
};
pub use snapshot::{InMemorySnapshotStore, PortfolioSnapshot, SnapshotStore};
