//! Risk checks, circuit breaker and confidence-scaled position sizing

use crate::config::RiskLimits;
use common::{PortfolioState, TradingError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

/// Stateless evaluator over a portfolio snapshot.
///
/// Every method is a pure function of its inputs and the limits captured at
/// construction, so a session can hold one manager for its whole lifetime.
#[derive(Debug, Clone)]
pub struct RiskManager {
    limits: RiskLimits,
}

/// Outcome of the daily-loss circuit breaker check
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyLossCheck {
    pub tripped: bool,
    pub daily_pnl_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopLossCheck {
    pub triggered: bool,
    pub pnl_pct: f64,
}

/// A position that breached its stop-loss and must be liquidated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLossTrigger {
    pub ticker: String,
    pub current_price: f64,
    pub avg_cost: f64,
    pub quantity: u64,
    pub pnl_pct: f64,
    pub loss_amount: f64,
}

/// Recommended order size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSize {
    pub quantity: u64,
    pub trade_value: f64,
    pub position_pct: f64,
    pub reasoning: String,
}

impl PositionSize {
    fn zero(reasoning: impl Into<String>) -> Self {
        Self {
            quantity: 0,
            trade_value: 0.0,
            position_pct: 0.0,
            reasoning: reasoning.into(),
        }
    }
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Reject a trade that would push the ticker's position past the
    /// concentration limit.
    pub fn check_position_size_limit(
        &self,
        state: &PortfolioState,
        ticker: &str,
        proposed_trade_value: f64,
    ) -> Result<(), RiskViolation> {
        let total_assets = state.total_value;
        if !(total_assets > 0.0) {
            return Err(RiskViolation::NoAssets { total_assets });
        }

        let max_position_value = total_assets * self.limits.max_position_size_pct / 100.0;
        let new_position_value = state.position_value(ticker) + proposed_trade_value;

        if new_position_value > max_position_value {
            let violation = RiskViolation::PositionSizeExceeded {
                ticker: ticker.to_string(),
                new_value: new_position_value,
                new_pct: new_position_value / total_assets * 100.0,
                limit_value: max_position_value,
                limit_pct: self.limits.max_position_size_pct,
            };
            warn!(ticker = %ticker, "{}", violation);
            return Err(violation);
        }

        debug!(
            ticker = %ticker,
            new_position_value = new_position_value,
            max_position_value = max_position_value,
            "Position size check passed"
        );
        Ok(())
    }

    /// The circuit breaker. The boundary is inclusive.
    pub fn check_daily_loss_limit(&self, state: &PortfolioState) -> DailyLossCheck {
        let daily_pnl_pct = state.daily_pnl_pct;
        let tripped = daily_pnl_pct <= -self.limits.daily_loss_limit_pct;

        if tripped {
            error!(
                daily_pnl_pct = daily_pnl_pct,
                limit_pct = self.limits.daily_loss_limit_pct,
                "Circuit breaker TRIPPED - new positions halted"
            );
        }

        DailyLossCheck {
            tripped,
            daily_pnl_pct,
        }
    }

    /// Whether new positions may be opened right now.
    pub fn can_trade_now(&self, state: &PortfolioState) -> Result<(), RiskViolation> {
        let check = self.check_daily_loss_limit(state);
        if check.tripped {
            return Err(RiskViolation::DailyLossLimitExceeded {
                daily_pnl_pct: check.daily_pnl_pct,
                limit_pct: self.limits.daily_loss_limit_pct,
            });
        }
        Ok(())
    }

    pub fn check_stop_loss(
        &self,
        state: &PortfolioState,
        ticker: &str,
        current_price: f64,
    ) -> StopLossCheck {
        let not_triggered = StopLossCheck {
            triggered: false,
            pnl_pct: 0.0,
        };

        let Some(position) = state.position(ticker) else {
            return not_triggered;
        };
        if !(position.avg_cost > 0.0) || !current_price.is_finite() {
            return not_triggered;
        }

        // Compare as fractions; scaling to percent first loses the exact boundary.
        let change = (current_price - position.avg_cost) / position.avg_cost;
        let triggered = change <= -self.limits.stop_loss_pct / 100.0;

        StopLossCheck {
            triggered,
            pnl_pct: change * 100.0,
        }
    }

    /// Scan every open position and return the ones past their stop-loss.
    pub fn check_all_stop_losses(&self, state: &PortfolioState) -> Vec<StopLossTrigger> {
        let triggers: Vec<StopLossTrigger> = state
            .positions
            .iter()
            .filter_map(|position| {
                let check = self.check_stop_loss(state, &position.ticker, position.current_price);
                check.triggered.then(|| StopLossTrigger {
                    ticker: position.ticker.clone(),
                    current_price: position.current_price,
                    avg_cost: position.avg_cost,
                    quantity: position.quantity,
                    pnl_pct: check.pnl_pct,
                    loss_amount: position.unrealized_pnl,
                })
            })
            .collect();

        for trigger in &triggers {
            warn!(
                ticker = %trigger.ticker,
                pnl_pct = trigger.pnl_pct,
                current_price = trigger.current_price,
                avg_cost = trigger.avg_cost,
                "Stop-loss triggered"
            );
        }

        triggers
    }

    /// Confidence-scaled order size under the concentration limit.
    ///
    /// The target position is `max_position_value * confidence`; the trade is
    /// the gap to that target, capped by available cash and remaining room,
    /// rounded down to whole shares. When that rounds to zero a single share
    /// is still allowed if both cash and room cover it.
    pub fn calculate_position_size(
        &self,
        state: &PortfolioState,
        ticker: &str,
        confidence: f64,
        price_per_share: f64,
    ) -> PositionSize {
        if !(price_per_share.is_finite() && price_per_share > 0.0) {
            return PositionSize::zero(format!("Invalid price per share: {}", price_per_share));
        }

        let total_assets = state.total_value;
        if !(total_assets > 0.0) {
            return PositionSize::zero(format!("No assets available (total {:.2})", total_assets));
        }

        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let available_cash = state.cash_balance.max(0.0);

        let max_position_value = total_assets * self.limits.max_position_size_pct / 100.0;
        let existing_value = state.position_value(ticker);
        let room = max_position_value - existing_value;

        let target_trade_value = (max_position_value * confidence - existing_value)
            .min(available_cash)
            .min(room);

        let mut quantity = (target_trade_value.max(0.0) / price_per_share).floor() as u64;
        if quantity == 0 && available_cash >= price_per_share && room >= price_per_share {
            quantity = 1;
        }

        let trade_value = quantity as f64 * price_per_share;
        let position_pct = trade_value / total_assets * 100.0;

        PositionSize {
            quantity,
            trade_value,
            position_pct,
            reasoning: format!(
                "Confidence: {:.2}, max position: {:.0}% ({:.2}), existing: {:.2}, \
                 target trade: {:.1}% of assets, available cash: {:.2}",
                confidence,
                self.limits.max_position_size_pct,
                max_position_value,
                existing_value,
                position_pct,
                available_cash
            ),
        }
    }
}

/// Why a trade was refused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RiskViolation {
    PositionSizeExceeded {
        ticker: String,
        new_value: f64,
        new_pct: f64,
        limit_value: f64,
        limit_pct: f64,
    },
    DailyLossLimitExceeded {
        daily_pnl_pct: f64,
        limit_pct: f64,
    },
    NoAssets {
        total_assets: f64,
    },
}

impl RiskViolation {
    pub fn is_circuit_breaker(&self) -> bool {
        matches!(self, RiskViolation::DailyLossLimitExceeded { .. })
    }
}

impl std::fmt::Display for RiskViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskViolation::PositionSizeExceeded {
                ticker,
                new_value,
                new_pct,
                limit_value,
                limit_pct,
            } => write!(
                f,
                "Position size limit exceeded for {}: new position {:.2} ({:.1}%) exceeds max {:.2} ({:.0}%)",
                ticker, new_value, new_pct, limit_value, limit_pct
            ),
            RiskViolation::DailyLossLimitExceeded {
                daily_pnl_pct,
                limit_pct,
            } => write!(
                f,
                "Trading halted: daily P/L {:.2}% breaches -{:.0}% circuit breaker",
                daily_pnl_pct, limit_pct
            ),
            RiskViolation::NoAssets { total_assets } => {
                write!(f, "Cannot size trade against total assets of {:.2}", total_assets)
            }
        }
    }
}

impl std::error::Error for RiskViolation {}

impl From<RiskViolation> for TradingError {
    fn from(violation: RiskViolation) -> Self {
        match violation {
            RiskViolation::DailyLossLimitExceeded { daily_pnl_pct, .. } => {
                TradingError::CircuitBreakerTripped { daily_pnl_pct }
            }
            other => TradingError::RiskViolation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::Position;

    fn state(cash: f64, positions: Vec<Position>, daily_pnl_pct: f64) -> PortfolioState {
        let holdings_value: f64 = positions.iter().map(|p| p.market_value).sum();
        PortfolioState {
            timestamp: Utc::now(),
            cash_balance: cash,
            holdings_value,
            total_value: cash + holdings_value,
            positions,
            daily_pnl: 0.0,
            daily_pnl_pct,
            total_pnl: 0.0,
            total_pnl_pct: 0.0,
        }
    }

    fn manager() -> RiskManager {
        RiskManager::new(RiskLimits::default())
    }

    #[test]
    fn test_circuit_breaker_boundary_is_inclusive() {
        let rm = manager();
        assert!(rm.check_daily_loss_limit(&state(1000.0, vec![], -20.0)).tripped);
        assert!(!rm.check_daily_loss_limit(&state(1000.0, vec![], -19.99)).tripped);

        let err = rm.can_trade_now(&state(1000.0, vec![], -25.0)).unwrap_err();
        assert!(err.is_circuit_breaker());
        assert!(matches!(
            TradingError::from(err),
            TradingError::CircuitBreakerTripped { .. }
        ));
    }

    #[test]
    fn test_stop_loss_boundary() {
        let rm = manager();
        let s = state(0.0, vec![Position::new("AAPL", 10, 100.0, 70.0)], 0.0);

        let at_limit = rm.check_stop_loss(&s, "AAPL", 70.0);
        assert!(at_limit.triggered);
        assert!((at_limit.pnl_pct + 30.0).abs() < 1e-9);

        assert!(!rm.check_stop_loss(&s, "AAPL", 70.01).triggered);
        assert!(!rm.check_stop_loss(&s, "MSFT", 1.0).triggered);
    }

    #[test]
    fn test_check_all_stop_losses() {
        let rm = manager();
        let s = state(
            1000.0,
            vec![
                Position::new("AAPL", 10, 100.0, 65.0),
                Position::new("MSFT", 5, 100.0, 95.0),
            ],
            0.0,
        );

        let triggers = rm.check_all_stop_losses(&s);
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].ticker, "AAPL");
        assert_eq!(triggers[0].quantity, 10);
        assert_eq!(triggers[0].loss_amount, -350.0);
    }

    #[test]
    fn test_position_size_limit() {
        let rm = manager();
        let s = state(600.0, vec![Position::new("AAPL", 4, 100.0, 100.0)], 0.0);

        assert!(rm.check_position_size_limit(&s, "AAPL", 0.0).is_ok());
        assert!(rm.check_position_size_limit(&s, "TSLA", 400.0).is_ok());
        let err = rm.check_position_size_limit(&s, "AAPL", 1.0).unwrap_err();
        assert!(err.to_string().contains("AAPL"));

        let empty = state(0.0, vec![], 0.0);
        assert!(matches!(
            rm.check_position_size_limit(&empty, "AAPL", 1.0),
            Err(RiskViolation::NoAssets { .. })
        ));
    }

    #[test]
    fn test_position_sizing_scales_with_confidence() {
        let rm = manager();
        let s = state(800_000.0, vec![], 0.0);

        let sized = rm.calculate_position_size(&s, "X", 0.8, 100.0);
        assert_eq!(sized.quantity, 2560);
        assert_eq!(sized.trade_value, 256_000.0);
        assert!((sized.position_pct - 32.0).abs() < 1e-9);

        let full = rm.calculate_position_size(&s, "X", 1.0, 100.0);
        assert_eq!(full.quantity, 3200);
    }

    #[test]
    fn test_position_sizing_subtracts_existing_position() {
        let rm = manager();
        let s = state(600.0, vec![Position::new("AAPL", 3, 100.0, 100.0)], 0.0);

        // max 360, existing 300, target at full confidence is 60
        let sized = rm.calculate_position_size(&s, "AAPL", 1.0, 20.0);
        assert_eq!(sized.quantity, 3);

        // over target already, but a share still fits in the remaining room
        let sized = rm.calculate_position_size(&s, "AAPL", 0.5, 20.0);
        assert_eq!(sized.quantity, 1);

        let sized = rm.calculate_position_size(&s, "AAPL", 0.5, 100.0);
        assert_eq!(sized.quantity, 0);
    }

    #[test]
    fn test_position_sizing_degenerate_inputs() {
        let rm = manager();
        let s = state(1000.0, vec![], 0.0);

        assert_eq!(rm.calculate_position_size(&s, "A", 0.5, 0.0).quantity, 0);
        assert_eq!(rm.calculate_position_size(&s, "A", f64::NAN, 10.0).quantity, 1);
        assert_eq!(rm.calculate_position_size(&state(0.0, vec![], 0.0), "A", 1.0, 10.0).quantity, 0);

        let clamped = rm.calculate_position_size(&s, "A", 3.0, 10.0);
        assert_eq!(clamped.quantity, 40);
    }
}
