//! Domain types: portfolio, orders, decisions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(TradeAction::Buy),
            "SELL" => Ok(TradeAction::Sell),
            other => Err(format!("unknown trade action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            other => Err(format!("unknown order type '{}'", other)),
        }
    }
}

/// Which kind of decision session produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionType {
    PreMarket,
    MidSession,
    PreClose,
    OnDemand,
}

impl DecisionType {
    /// Session types that run on the daily clock.
    pub const SCHEDULED: [DecisionType; 3] = [
        DecisionType::PreMarket,
        DecisionType::MidSession,
        DecisionType::PreClose,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionType::PreMarket => "PRE_MARKET",
            DecisionType::MidSession => "MID_SESSION",
            DecisionType::PreClose => "PRE_CLOSE",
            DecisionType::OnDemand => "ON_DEMAND",
        }
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PRE_MARKET" => Ok(DecisionType::PreMarket),
            "MID_SESSION" => Ok(DecisionType::MidSession),
            "PRE_CLOSE" => Ok(DecisionType::PreClose),
            "ON_DEMAND" => Ok(DecisionType::OnDemand),
            other => Err(format!("unknown decision type '{}'", other)),
        }
    }
}

/// Discrete recommendation derived from a composite signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::StrongBuy => "STRONG_BUY",
            Recommendation::Buy => "BUY",
            Recommendation::Hold => "HOLD",
            Recommendation::Sell => "SELL",
            Recommendation::StrongSell => "STRONG_SELL",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open brokerage position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub quantity: u64,
    pub avg_cost: f64,
    pub current_price: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_pct: f64,
}

impl Position {
    /// Build a position, deriving market value and unrealized P/L from price.
    pub fn new(ticker: impl Into<String>, quantity: u64, avg_cost: f64, current_price: f64) -> Self {
        let market_value = quantity as f64 * current_price;
        let cost_basis = quantity as f64 * avg_cost;
        let unrealized_pnl = market_value - cost_basis;
        let unrealized_pnl_pct = if avg_cost > 0.0 {
            (current_price - avg_cost) / avg_cost * 100.0
        } else {
            0.0
        };

        Self {
            ticker: ticker.into(),
            quantity,
            avg_cost,
            current_price,
            market_value,
            unrealized_pnl,
            unrealized_pnl_pct,
        }
    }
}

/// Cash and account value as reported by the brokerage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub cash_balance: f64,
    pub total_value: f64,
}

/// Point-in-time portfolio view, recomputed every session.
///
/// `total_value == cash_balance + sum(position.market_value)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub timestamp: DateTime<Utc>,
    pub cash_balance: f64,
    pub holdings_value: f64,
    pub total_value: f64,
    pub positions: Vec<Position>,
    pub daily_pnl: f64,
    pub daily_pnl_pct: f64,
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
}

impl PortfolioState {
    pub fn position(&self, ticker: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.ticker.eq_ignore_ascii_case(ticker))
    }

    /// Market value of the position in `ticker`, zero when not held.
    pub fn position_value(&self, ticker: &str) -> f64 {
        self.position(ticker).map(|p| p.market_value).unwrap_or(0.0)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn tickers(&self) -> Vec<String> {
        self.positions.iter().map(|p| p.ticker.clone()).collect()
    }

    pub fn summary(&self) -> PortfolioSummary {
        PortfolioSummary {
            total_value: self.total_value,
            cash_balance: self.cash_balance,
            position_count: self.position_count(),
            daily_pnl_pct: self.daily_pnl_pct,
        }
    }
}

/// Compact portfolio view stored on decision records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub total_value: f64,
    pub cash_balance: f64,
    pub position_count: usize,
    pub daily_pnl_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub ticker: String,
    pub action: TradeAction,
    pub quantity: u64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
}

impl OrderRequest {
    pub fn market(ticker: impl Into<String>, action: TradeAction, quantity: u64) -> Self {
        Self {
            ticker: ticker.into(),
            action,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub error: Option<String>,
}

impl OrderResult {
    pub fn filled(order_id: impl Into<String>) -> Self {
        Self {
            success: true,
            order_id: Some(order_id.into()),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            error: Some(error.into()),
        }
    }
}

/// One function invocation requested by the decision model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub function_name: String,
    pub arguments: serde_json::Value,
    pub result: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl ToolCall {
    pub fn succeeded(&self) -> bool {
        self.result
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Signal digest stored on decision records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSummary {
    pub ticker: String,
    pub composite_sentiment: f64,
    pub signal_strength: f64,
    pub recommendation: Recommendation,
}

/// Immutable audit entry written once per decision session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub decision_type: DecisionType,
    pub prompt_summary: String,
    pub reasoning_text: String,
    pub confidence_score: f64,
    pub tool_call_log: Vec<ToolCall>,
    pub signals_used: Vec<SignalSummary>,
    pub portfolio_state: PortfolioSummary,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn executed_trades(&self) -> impl Iterator<Item = &ToolCall> {
        self.tool_call_log
            .iter()
            .filter(|call| call.function_name == "execute_trade")
    }
}
