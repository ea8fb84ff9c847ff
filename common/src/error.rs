//! Error taxonomy shared by every component boundary

use thiserror::Error;

pub type TradingResult<T> = Result<T, TradingError>;

/// Failures that components convert into structured `success: false` results.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TradingError {
    /// Missing or invalid credentials / settings. The affected service is
    /// treated as unavailable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A brokerage, LLM or signal-source call failed.
    #[error("{service} error: {message}")]
    ExternalService { service: String, message: String },

    /// A proposed trade breaches a risk limit. Blocks that action only.
    #[error("risk violation: {0}")]
    RiskViolation(String),

    /// Daily loss limit reached; no new positions for the rest of the session.
    #[error("circuit breaker tripped: daily P/L {daily_pnl_pct:.2}%")]
    CircuitBreakerTripped { daily_pnl_pct: f64 },

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// Malformed arguments supplied by a caller (usually the decision model).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl TradingError {
    pub fn external(service: impl Into<String>, message: impl std::fmt::Display) -> Self {
        TradingError::ExternalService {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn is_risk_violation(&self) -> bool {
        matches!(self, TradingError::RiskViolation(_))
    }

    pub fn is_circuit_breaker(&self) -> bool {
        matches!(self, TradingError::CircuitBreakerTripped { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TradingError::CircuitBreakerTripped { daily_pnl_pct: -21.5 };
        assert_eq!(err.to_string(), "circuit breaker tripped: daily P/L -21.50%");

        let err = TradingError::external("broker", "connection reset");
        assert_eq!(err.to_string(), "broker error: connection reset");
    }

    #[test]
    fn test_error_tags() {
        assert!(TradingError::RiskViolation("too big".into()).is_risk_violation());
        assert!(!TradingError::InvalidInput("x".into()).is_circuit_breaker());
    }
}
