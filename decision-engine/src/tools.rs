//! The callable trading functions exposed to the decision model
//!
//! These eight operations are the model's entire capability surface. Every
//! call returns a JSON object carrying a `success` flag; failures are reported
//! as `{"success": false, "error": ...}` and never escape as errors.

use crate::llm::ToolDefinition;
use anyhow::Context;
use chrono::{Duration, Utc};
use common::{OrderRequest, OrderType, TradeAction, TradingError};
use execution::{usable_price, win_rate_pct, TradeLog, TradeRecord, TradeStatus};
use portfolio_risk::{PortfolioTracker, RiskManager};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use signal_generation::SignalAggregator;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const CHECK_BALANCE: &str = "check_balance";
pub const GET_CURRENT_PRICE: &str = "get_current_price";
pub const GET_PORTFOLIO_STATUS: &str = "get_portfolio_status";
pub const EXECUTE_TRADE: &str = "execute_trade";
pub const ANALYZE_SIGNALS: &str = "analyze_signals";
pub const CALCULATE_POSITION_SIZE: &str = "calculate_position_size";
pub const CHECK_STOP_LOSS_TRIGGERS: &str = "check_stop_loss_triggers";
pub const GET_TRADING_HISTORY: &str = "get_trading_history";

const DEFAULT_HOURS_BACK: i64 = 24;
const DEFAULT_DAYS_BACK: i64 = 7;

/// Look-back windows the model may ask for are clamped to one year
const MAX_HOURS_BACK: i64 = 24 * 365;
const MAX_DAYS_BACK: i64 = 365;

#[derive(Debug, Deserialize)]
struct TickerArgs {
    ticker: String,
}

#[derive(Debug, Deserialize)]
struct ExecuteTradeArgs {
    ticker: String,
    action: String,
    quantity: f64,
    #[serde(default)]
    order_type: Option<String>,
    #[serde(default)]
    limit_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeSignalsArgs {
    ticker: String,
    #[serde(default)]
    hours_back: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PositionSizeArgs {
    ticker: String,
    confidence: f64,
    price: f64,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryArgs {
    #[serde(default)]
    days_back: Option<i64>,
}

/// A validated `execute_trade` request
#[derive(Debug, Clone, PartialEq)]
struct TradeIntent {
    ticker: String,
    action: TradeAction,
    quantity: u64,
    order_type: OrderType,
    limit_price: Option<f64>,
}

impl TryFrom<ExecuteTradeArgs> for TradeIntent {
    type Error = TradingError;

    fn try_from(args: ExecuteTradeArgs) -> Result<Self, Self::Error> {
        let ticker = normalize_ticker(&args.ticker)?;
        let action: TradeAction = args.action.parse().map_err(TradingError::InvalidInput)?;
        let order_type: OrderType = match args.order_type.as_deref() {
            Some(raw) => raw.parse().map_err(TradingError::InvalidInput)?,
            None => OrderType::Market,
        };

        if !(args.quantity.is_finite() && args.quantity >= 1.0 && args.quantity.fract() == 0.0) {
            return Err(TradingError::InvalidInput(format!(
                "quantity must be a positive whole number of shares, got {}",
                args.quantity
            )));
        }

        let limit_price = match order_type {
            OrderType::Limit => match args.limit_price {
                Some(p) if p.is_finite() && p > 0.0 => Some(p),
                _ => {
                    return Err(TradingError::InvalidInput(
                        "LIMIT orders require a positive limit_price".to_string(),
                    ))
                }
            },
            OrderType::Market => None,
        };

        Ok(Self {
            ticker,
            action,
            quantity: args.quantity as u64,
            order_type,
            limit_price,
        })
    }
}

fn normalize_ticker(raw: &str) -> Result<String, TradingError> {
    let ticker = raw.trim().to_ascii_uppercase();
    if ticker.is_empty() {
        return Err(TradingError::InvalidInput("ticker must not be empty".to_string()));
    }
    Ok(ticker)
}

fn parse_args<T: DeserializeOwned>(function: &str, arguments: &Value) -> anyhow::Result<T> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments.clone()
    };
    serde_json::from_value(arguments).map_err(|e| {
        TradingError::InvalidInput(format!("bad arguments for {}: {}", function, e)).into()
    })
}

fn failure(error: impl std::fmt::Display) -> Value {
    json!({ "success": false, "error": error.to_string() })
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Trading operations bound to one session's collaborators and risk limits
#[derive(Clone)]
pub struct TradingFunctions {
    tracker: PortfolioTracker,
    risk: RiskManager,
    signals: Arc<SignalAggregator>,
    trades: Arc<dyn TradeLog>,
}

impl TradingFunctions {
    pub fn new(
        tracker: PortfolioTracker,
        risk: RiskManager,
        signals: Arc<SignalAggregator>,
        trades: Arc<dyn TradeLog>,
    ) -> Self {
        Self {
            tracker,
            risk,
            signals,
            trades,
        }
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    /// Invoke a function by name. Never fails; errors come back as
    /// `{"success": false, "error": ...}`.
    pub async fn dispatch(&self, function_name: &str, arguments: &Value) -> Value {
        info!(function = function_name, arguments = %arguments, "Executing trading function");

        let outcome = match function_name {
            CHECK_BALANCE => self.check_balance().await,
            GET_CURRENT_PRICE => self.get_current_price(arguments).await,
            GET_PORTFOLIO_STATUS => self.get_portfolio_status().await,
            EXECUTE_TRADE => self.execute_trade(arguments).await,
            ANALYZE_SIGNALS => self.analyze_signals(arguments).await,
            CALCULATE_POSITION_SIZE => self.calculate_position_size(arguments).await,
            CHECK_STOP_LOSS_TRIGGERS => self.check_stop_loss_triggers().await,
            GET_TRADING_HISTORY => self.get_trading_history(arguments).await,
            unknown => {
                warn!(function = unknown, "Unknown function requested");
                return failure(format!("Unknown function: {}", unknown));
            }
        };

        match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(function = function_name, "Trading function failed: {:#}", e);
                failure(format!("{:#}", e))
            }
        }
    }

    async fn check_balance(&self) -> anyhow::Result<Value> {
        let balance = self
            .tracker
            .broker()
            .get_balance()
            .await
            .context("balance query failed")?;

        Ok(json!({
            "success": true,
            "cash_balance": balance.cash_balance,
            "total_value": balance.total_value,
            "timestamp": timestamp(),
        }))
    }

    async fn get_current_price(&self, arguments: &Value) -> anyhow::Result<Value> {
        let args: TickerArgs = parse_args(GET_CURRENT_PRICE, arguments)?;
        let ticker = normalize_ticker(&args.ticker)?;

        match usable_price(self.tracker.broker().get_price(&ticker).await) {
            Some(price) => Ok(json!({
                "success": true,
                "ticker": ticker,
                "price": price,
                "timestamp": timestamp(),
            })),
            None => Ok(failure(format!("Could not fetch price for {}", ticker))),
        }
    }

    async fn get_portfolio_status(&self) -> anyhow::Result<Value> {
        let state = self.tracker.current_state().await?;
        let exposure = PortfolioTracker::exposure_by_ticker(&state);

        Ok(json!({
            "success": true,
            "cash_balance": state.cash_balance,
            "holdings_value": state.holdings_value,
            "total_value": state.total_value,
            "positions": state.positions,
            "position_count": state.position_count(),
            "daily_pnl": state.daily_pnl,
            "daily_pnl_pct": state.daily_pnl_pct,
            "total_pnl": state.total_pnl,
            "total_pnl_pct": state.total_pnl_pct,
            "exposure_by_ticker": exposure,
            "timestamp": timestamp(),
        }))
    }

    async fn execute_trade(&self, arguments: &Value) -> anyhow::Result<Value> {
        let args: ExecuteTradeArgs = parse_args(EXECUTE_TRADE, arguments)?;
        let intent = TradeIntent::try_from(args)?;
        let broker = self.tracker.broker();

        let Some(current_price) = usable_price(broker.get_price(&intent.ticker).await) else {
            return Ok(failure(format!(
                "Could not fetch current price for {}",
                intent.ticker
            )));
        };
        let price_to_use = intent.limit_price.unwrap_or(current_price);
        let trade_value = intent.quantity as f64 * price_to_use;

        // Opening or adding to a position must clear both risk gates first.
        if intent.action == TradeAction::Buy {
            let state = self.tracker.current_state().await?;

            if let Err(violation) =
                self.risk
                    .check_position_size_limit(&state, &intent.ticker, trade_value)
            {
                return Ok(json!({
                    "success": false,
                    "error": format!("Risk check failed: {}", violation),
                    "risk_violation": true,
                }));
            }

            if let Err(violation) = self.risk.can_trade_now(&state) {
                return Ok(json!({
                    "success": false,
                    "error": violation.to_string(),
                    "circuit_breaker": true,
                }));
            }
        }

        let order = OrderRequest {
            ticker: intent.ticker.clone(),
            action: intent.action,
            quantity: intent.quantity,
            order_type: intent.order_type,
            limit_price: intent.limit_price,
        };
        let result = broker.place_order(&order).await;

        let record = TradeRecord {
            id: Uuid::new_v4(),
            ticker: intent.ticker.clone(),
            action: intent.action,
            quantity: intent.quantity,
            price: price_to_use,
            total_value: trade_value,
            order_type: intent.order_type,
            status: if result.success {
                TradeStatus::Filled
            } else {
                TradeStatus::Rejected
            },
            order_id: result.order_id.clone(),
            error: result.error.clone(),
            executed_at: Utc::now(),
        };
        if let Err(e) = self.trades.append(record).await {
            warn!(ticker = %intent.ticker, "Failed to record trade: {:#}", e);
        }

        if !result.success {
            let error = result.error.unwrap_or_else(|| "Unknown error".to_string());
            warn!(ticker = %intent.ticker, action = %intent.action, "Order rejected: {}", error);
            return Ok(failure(error));
        }

        info!(
            ticker = %intent.ticker,
            action = %intent.action,
            quantity = intent.quantity,
            order_type = %intent.order_type,
            "Order placed"
        );

        Ok(json!({
            "success": true,
            "ticker": intent.ticker,
            "action": intent.action,
            "quantity": intent.quantity,
            "order_type": intent.order_type,
            "order_id": result.order_id,
            "estimated_price": current_price,
            "timestamp": timestamp(),
        }))
    }

    async fn analyze_signals(&self, arguments: &Value) -> anyhow::Result<Value> {
        let args: AnalyzeSignalsArgs = parse_args(ANALYZE_SIGNALS, arguments)?;
        let ticker = normalize_ticker(&args.ticker)?;
        let hours_back = args
            .hours_back
            .unwrap_or(DEFAULT_HOURS_BACK)
            .clamp(0, MAX_HOURS_BACK);

        let current = self.signals.aggregate(&ticker).await;
        let recent = self.signals.get_recent(&ticker, hours_back).await?;

        Ok(json!({
            "success": true,
            "ticker": ticker,
            "composite_sentiment": current.composite_sentiment,
            "signal_strength": current.signal_strength,
            "recommendation": current.recommendation,
            "current_signals": current,
            "recent_signals": recent,
            "hours_back": hours_back,
            "timestamp": timestamp(),
        }))
    }

    async fn calculate_position_size(&self, arguments: &Value) -> anyhow::Result<Value> {
        let args: PositionSizeArgs = parse_args(CALCULATE_POSITION_SIZE, arguments)?;
        let ticker = normalize_ticker(&args.ticker)?;

        let state = self.tracker.current_state().await?;
        let size = self
            .risk
            .calculate_position_size(&state, &ticker, args.confidence, args.price);

        Ok(json!({
            "success": true,
            "ticker": ticker,
            "confidence": args.confidence,
            "price_per_share": args.price,
            "recommended_quantity": size.quantity,
            "trade_value": size.trade_value,
            "position_pct": size.position_pct,
            "reasoning": size.reasoning,
            "timestamp": timestamp(),
        }))
    }

    async fn check_stop_loss_triggers(&self) -> anyhow::Result<Value> {
        let state = self.tracker.current_state().await?;
        let triggered = self.risk.check_all_stop_losses(&state);

        Ok(json!({
            "success": true,
            "count": triggered.len(),
            "triggered_positions": triggered,
            "timestamp": timestamp(),
        }))
    }

    async fn get_trading_history(&self, arguments: &Value) -> anyhow::Result<Value> {
        let args: HistoryArgs = parse_args(GET_TRADING_HISTORY, arguments)?;
        let days_back = args
            .days_back
            .unwrap_or(DEFAULT_DAYS_BACK)
            .clamp(0, MAX_DAYS_BACK);

        let cutoff = Utc::now() - Duration::days(days_back);
        let trades = self
            .trades
            .since(cutoff)
            .await
            .context("trade history query failed")?;

        let trade_list: Vec<Value> = trades
            .iter()
            .map(|t| {
                json!({
                    "trade_id": t.id,
                    "ticker": t.ticker,
                    "action": t.action,
                    "quantity": t.quantity,
                    "price": t.price,
                    "total_value": t.total_value,
                    "status": t.status.as_str(),
                    "executed_at": t.executed_at.to_rfc3339(),
                })
            })
            .collect();

        Ok(json!({
            "success": true,
            "total_trades": trade_list.len(),
            "trades": trade_list,
            "days_back": days_back,
            "win_rate_pct": win_rate_pct(&trades),
            "timestamp": timestamp(),
        }))
    }

    /// JSON-schema definitions for all eight functions.
    pub fn definitions() -> Vec<ToolDefinition> {
        let empty = || json!({ "type": "object", "properties": {}, "required": [] });

        vec![
            ToolDefinition {
                name: CHECK_BALANCE.to_string(),
                description: "Get current account balance including cash and total asset value"
                    .to_string(),
                parameters: empty(),
            },
            ToolDefinition {
                name: GET_CURRENT_PRICE.to_string(),
                description: "Get current market price for a specific US stock ticker".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "ticker": { "type": "string", "description": "US stock ticker symbol (e.g., AAPL, TSLA, NVDA)" }
                    },
                    "required": ["ticker"]
                }),
            },
            ToolDefinition {
                name: GET_PORTFOLIO_STATUS.to_string(),
                description:
                    "Get comprehensive portfolio status including all positions, P/L, and exposure"
                        .to_string(),
                parameters: empty(),
            },
            ToolDefinition {
                name: EXECUTE_TRADE.to_string(),
                description: "Execute a trade (buy or sell) for a US stock. This places a real order through the broker. BUY orders are checked against position-size and daily-loss limits and are refused, never resized, when a limit would be breached.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "ticker": { "type": "string", "description": "US stock ticker symbol" },
                        "action": { "type": "string", "enum": ["BUY", "SELL"], "description": "BUY to open/increase a position, SELL to close/decrease it" },
                        "quantity": { "type": "integer", "description": "Number of shares to trade" },
                        "order_type": { "type": "string", "enum": ["MARKET", "LIMIT"], "description": "MARKET for immediate execution, LIMIT for a specific price" },
                        "limit_price": { "type": "number", "description": "Limit price, required when order_type is LIMIT" }
                    },
                    "required": ["ticker", "action", "quantity", "order_type"]
                }),
            },
            ToolDefinition {
                name: ANALYZE_SIGNALS.to_string(),
                description: "Get aggregated market signals for a ticker from social sentiment, technical/news data and analyst consensus".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "ticker": { "type": "string", "description": "US stock ticker symbol" },
                        "hours_back": { "type": "integer", "description": "Hours to look back for recent signals (default: 24)" }
                    },
                    "required": ["ticker"]
                }),
            },
            ToolDefinition {
                name: CALCULATE_POSITION_SIZE.to_string(),
                description: "Calculate the position size allowed by confidence, price and risk limits".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "ticker": { "type": "string", "description": "US stock ticker symbol" },
                        "confidence": { "type": "number", "description": "Confidence from 0.0 to 1.0 for this trade" },
                        "price": { "type": "number", "description": "Current or expected price per share" }
                    },
                    "required": ["ticker", "confidence", "price"]
                }),
            },
            ToolDefinition {
                name: CHECK_STOP_LOSS_TRIGGERS.to_string(),
                description: "Check whether any positions have fallen through their stop-loss level".to_string(),
                parameters: empty(),
            },
            ToolDefinition {
                name: GET_TRADING_HISTORY.to_string(),
                description: "Get recent trading history and win rate to review past decisions".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "days_back": { "type": "integer", "description": "Days to look back (default: 7)" }
                    },
                    "required": []
                }),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Position;
    use execution::{InMemoryTradeLog, PaperBroker};
    use portfolio_risk::{InMemorySnapshotStore, PortfolioSnapshot, RiskLimits, SnapshotStore};
    use signal_generation::{
        AnalystConsensus, AnalystReading, FixedFeeds, InMemorySignalStore, SignalsConfig,
    };

    struct Fixture {
        broker: Arc<PaperBroker>,
        snapshots: Arc<InMemorySnapshotStore>,
        trades: Arc<InMemoryTradeLog>,
        functions: TradingFunctions,
    }

    fn fixture(cash: f64, feeds: FixedFeeds) -> Fixture {
        let broker = Arc::new(PaperBroker::with_cash(cash));
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let trades = Arc::new(InMemoryTradeLog::new());
        let feeds = Arc::new(feeds);
        let signals = Arc::new(SignalAggregator::new(
            feeds.clone(),
            feeds.clone(),
            feeds,
            Arc::new(InMemorySignalStore::new()),
            SignalsConfig::default(),
        ));
        let tracker = PortfolioTracker::new(
            broker.clone(),
            snapshots.clone(),
            cash,
            chrono_tz::America::New_York,
        );
        let functions = TradingFunctions::new(
            tracker,
            RiskManager::new(RiskLimits::default()),
            signals,
            trades.clone(),
        );
        Fixture {
            broker,
            snapshots,
            trades,
            functions,
        }
    }

    #[test]
    fn test_definitions_cover_all_functions() {
        let names: Vec<String> = TradingFunctions::definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(
            names,
            vec![
                CHECK_BALANCE,
                GET_CURRENT_PRICE,
                GET_PORTFOLIO_STATUS,
                EXECUTE_TRADE,
                ANALYZE_SIGNALS,
                CALCULATE_POSITION_SIZE,
                CHECK_STOP_LOSS_TRIGGERS,
                GET_TRADING_HISTORY,
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_function_and_bad_arguments() {
        let f = fixture(10_000.0, FixedFeeds::new());

        let result = f.functions.dispatch("transfer_funds", &json!({})).await;
        assert_eq!(result["success"], false);
        assert_eq!(result["error"], "Unknown function: transfer_funds");

        let result = f.functions.dispatch(GET_CURRENT_PRICE, &json!({})).await;
        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains("invalid input"));
    }

    #[tokio::test]
    async fn test_price_lookup_failure_is_reported() {
        let f = fixture(10_000.0, FixedFeeds::new());
        let result = f
            .functions
            .dispatch(GET_CURRENT_PRICE, &json!({"ticker": "zzzz"}))
            .await;
        assert_eq!(result["success"], false);
        assert_eq!(result["error"], "Could not fetch price for ZZZZ");
    }

    #[tokio::test]
    async fn test_buy_within_limits_is_placed_and_logged() {
        let f = fixture(100_000.0, FixedFeeds::new());
        f.broker.set_price("AAPL", 100.0);

        let result = f
            .functions
            .dispatch(
                EXECUTE_TRADE,
                &json!({"ticker": "aapl", "action": "BUY", "quantity": 10, "order_type": "MARKET"}),
            )
            .await;

        assert_eq!(result["success"], true);
        assert_eq!(result["ticker"], "AAPL");
        assert_eq!(result["estimated_price"], 100.0);
        assert!(result["order_id"].as_str().unwrap().starts_with("PAPER-"));
        assert_eq!(f.trades.len().await, 1);
    }

    #[tokio::test]
    async fn test_oversized_buy_is_refused_not_resized() {
        let f = fixture(100_000.0, FixedFeeds::new());
        f.broker.set_price("TSLA", 100.0);

        // 500 shares = 50% of assets, limit is 40%
        let result = f
            .functions
            .dispatch(
                EXECUTE_TRADE,
                &json!({"ticker": "TSLA", "action": "BUY", "quantity": 500, "order_type": "MARKET"}),
            )
            .await;

        assert_eq!(result["success"], false);
        assert_eq!(result["risk_violation"], true);
        assert_eq!(f.broker.orders_placed(), 0);
        assert_eq!(f.trades.len().await, 0);
    }

    #[tokio::test]
    async fn test_buy_refused_when_circuit_breaker_tripped() {
        let f = fixture(100_000.0, FixedFeeds::new());
        f.broker.set_price("NVDA", 10.0);

        let today = f
            .functions
            .tracker
            .trading_date(Utc::now());
        f.snapshots
            .upsert(&PortfolioSnapshot {
                snapshot_date: today,
                opening_value: 200_000.0,
                total_value: 200_000.0,
                cash_balance: 200_000.0,
                holdings_value: 0.0,
                daily_pnl: 0.0,
                daily_pnl_pct: 0.0,
                total_pnl: 0.0,
                total_pnl_pct: 0.0,
                positions: vec![],
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let result = f
            .functions
            .dispatch(
                EXECUTE_TRADE,
                &json!({"ticker": "NVDA", "action": "BUY", "quantity": 1, "order_type": "MARKET"}),
            )
            .await;

        assert_eq!(result["success"], false);
        assert_eq!(result["circuit_breaker"], true);
        assert_eq!(f.broker.orders_placed(), 0);
    }

    #[tokio::test]
    async fn test_sell_skips_risk_gates() {
        let f = fixture(0.0, FixedFeeds::new());
        f.broker.seed_position("AMD", 10, 100.0).await;
        f.broker.set_price("AMD", 120.0);

        let result = f
            .functions
            .dispatch(
                EXECUTE_TRADE,
                &json!({"ticker": "AMD", "action": "SELL", "quantity": 10, "order_type": "MARKET"}),
            )
            .await;
        assert_eq!(result["success"], true);
    }

    #[tokio::test]
    async fn test_trade_argument_validation() {
        let f = fixture(100_000.0, FixedFeeds::new());
        f.broker.set_price("AAPL", 100.0);

        for bad in [
            json!({"ticker": "AAPL", "action": "BUY", "quantity": 0, "order_type": "MARKET"}),
            json!({"ticker": "AAPL", "action": "BUY", "quantity": 1.5, "order_type": "MARKET"}),
            json!({"ticker": "AAPL", "action": "HOLD", "quantity": 1, "order_type": "MARKET"}),
            json!({"ticker": "AAPL", "action": "BUY", "quantity": 1, "order_type": "LIMIT"}),
            json!({"ticker": " ", "action": "BUY", "quantity": 1, "order_type": "MARKET"}),
        ] {
            let result = f.functions.dispatch(EXECUTE_TRADE, &bad).await;
            assert_eq!(result["success"], false, "accepted {}", bad);
        }
        assert_eq!(f.broker.orders_placed(), 0);
    }

    #[tokio::test]
    async fn test_rejected_order_is_logged() {
        let f = fixture(50.0, FixedFeeds::new());
        f.broker.set_price("MSFT", 10.0);

        // Limit below the quote is not marketable
        let result = f
            .functions
            .dispatch(
                EXECUTE_TRADE,
                &json!({"ticker": "MSFT", "action": "BUY", "quantity": 1, "order_type": "LIMIT", "limit_price": 5.0}),
            )
            .await;

        assert_eq!(result["success"], false);
        let history = f.functions.dispatch(GET_TRADING_HISTORY, &Value::Null).await;
        assert_eq!(history["total_trades"], 1);
        assert_eq!(history["trades"][0]["status"], "REJECTED");
        assert_eq!(history["days_back"], 7);
    }

    #[tokio::test]
    async fn test_position_size_and_stop_loss_scan() {
        let f = fixture(800_000.0, FixedFeeds::new());

        let sized = f
            .functions
            .dispatch(
                CALCULATE_POSITION_SIZE,
                &json!({"ticker": "X", "confidence": 0.8, "price": 100.0}),
            )
            .await;
        assert_eq!(sized["success"], true);
        assert_eq!(sized["recommended_quantity"], 2560);

        f.broker.seed_position("BA", 10, 100.0).await;
        f.broker.set_price("BA", 65.0);
        let scan = f.functions.dispatch(CHECK_STOP_LOSS_TRIGGERS, &json!({})).await;
        assert_eq!(scan["count"], 1);
        assert_eq!(scan["triggered_positions"][0]["ticker"], "BA");
    }

    #[tokio::test]
    async fn test_analyze_signals_reports_composite() {
        let feeds = FixedFeeds::new().with_analyst(
            "META",
            AnalystReading {
                consensus: AnalystConsensus::Buy,
                price_target: Some(600.0),
                upside_pct: Some(12.0),
                smart_money: None,
            },
        );
        let f = fixture(10_000.0, feeds);

        let result = f
            .functions
            .dispatch(ANALYZE_SIGNALS, &json!({"ticker": "meta"}))
            .await;

        assert_eq!(result["success"], true);
        assert_eq!(result["composite_sentiment"], 1.0);
        assert_eq!(result["hours_back"], 24);
        assert_eq!(result["recent_signals"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_huge_look_back_windows_are_clamped() {
        let f = fixture(10_000.0, FixedFeeds::new());

        let history = f
            .functions
            .dispatch(GET_TRADING_HISTORY, &json!({"days_back": 100_000_000}))
            .await;
        assert_eq!(history["success"], true);
        assert_eq!(history["days_back"], MAX_DAYS_BACK);

        let signals = f
            .functions
            .dispatch(ANALYZE_SIGNALS, &json!({"ticker": "AAPL", "hours_back": i64::MAX}))
            .await;
        assert_eq!(signals["success"], true);
        assert_eq!(signals["hours_back"], MAX_HOURS_BACK);

        let negative = f
            .functions
            .dispatch(GET_TRADING_HISTORY, &json!({"days_back": i64::MIN}))
            .await;
        assert_eq!(negative["days_back"], 0);
    }

    #[tokio::test]
    async fn test_portfolio_status_includes_exposure() {
        let f = fixture(0.0, FixedFeeds::new());
        f.broker.seed_position("AAPL", 10, 100.0).await;
        f.broker.set_price("AAPL", 100.0);

        let status = f.functions.dispatch(GET_PORTFOLIO_STATUS, &json!({})).await;
        assert_eq!(status["success"], true);
        assert_eq!(status["position_count"], 1);
        assert_eq!(status["exposure_by_ticker"]["AAPL"], 100.0);

        let positions: Vec<Position> =
            serde_json::from_value(status["positions"].clone()).unwrap();
        assert_eq!(positions[0].quantity, 10);
    }
}
