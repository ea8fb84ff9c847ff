//! Trading Engine - runs decision sessions end to end
//!
//! A session is: circuit-breaker check, portfolio fetch, ticker selection,
//! signal aggregation, the decision loop, the audit record and the daily
//! snapshot. Every failure is folded into the returned `SessionReport`;
//! nothing propagates to the scheduler.

use crate::context::AppContext;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::{
    DecisionRecord, DecisionType, OrderRequest, OrderType, PortfolioState, TradeAction,
    TradingError, Uuid,
};
use decision_engine::{DecisionContext, DecisionLog, DecisionOutcome};
use execution::{Broker, TradeLog, TradeRecord, TradeStatus};
use portfolio_risk::{PortfolioSnapshot, RiskManager};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Outcome of one decision session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub decision_type: DecisionType,
    pub success: bool,
    pub circuit_breaker: bool,
    pub error: Option<String>,
    /// Id of the audit record; `None` when the session never reached the
    /// decision engine or the record could not be written
    pub decision_id: Option<Uuid>,
    pub executed_trades: usize,
    pub successful_trades: usize,
    pub confidence_score: Option<f64>,
    pub signals_analyzed: usize,
    pub portfolio_value: Option<f64>,
    pub daily_pnl_pct: Option<f64>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl SessionReport {
    fn new(decision_type: DecisionType) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            decision_type,
            success: false,
            circuit_breaker: false,
            error: None,
            decision_id: None,
            executed_trades: 0,
            successful_trades: 0,
            confidence_score: None,
            signals_analyzed: 0,
            portfolio_value: None,
            daily_pnl_pct: None,
            duration_ms: 0,
            started_at: Utc::now(),
        }
    }
}

/// Result of one forced exit by the stop-loss sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLossExit {
    pub ticker: String,
    pub quantity: u64,
    pub pnl_pct: f64,
    pub success: bool,
    pub order_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct TradingEngine {
    ctx: Arc<AppContext>,
}

impl TradingEngine {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Run a scheduled or manually fired session.
    pub async fn run_session(&self, decision_type: DecisionType) -> SessionReport {
        self.execute(decision_type, None).await
    }

    /// Run an ON_DEMAND session for a single ticker.
    pub async fn analyze_ticker_on_demand(&self, ticker: &str) -> SessionReport {
        self.execute(DecisionType::OnDemand, Some(ticker.trim().to_ascii_uppercase()))
            .await
    }

    async fn execute(&self, decision_type: DecisionType, ticker: Option<String>) -> SessionReport {
        let started = Instant::now();
        let mut report = SessionReport::new(decision_type);

        info!(
            session_id = %report.session_id,
            decision_type = %decision_type,
            "Starting trading session"
        );

        if let Err(e) = self.session(ticker, &mut report).await {
            error!(
                session_id = %report.session_id,
                decision_type = %decision_type,
                "Session failed: {:#}",
                e
            );
            report.success = false;
            report.error = Some(format!("{:#}", e));
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            session_id = %report.session_id,
            decision_type = %decision_type,
            success = report.success,
            executed = report.executed_trades,
            successful = report.successful_trades,
            duration_ms = report.duration_ms,
            "Session finished"
        );
        report
    }

    async fn session(&self, ticker: Option<String>, report: &mut SessionReport) -> Result<()> {
        let decision_type = report.decision_type;
        let limits = self.ctx.risk_limits();
        let risk = RiskManager::new(limits);

        let state = self
            .ctx
            .tracker
            .current_state()
            .await
            .context("Failed to fetch portfolio state")?;
        report.portfolio_value = Some(state.total_value);
        report.daily_pnl_pct = Some(state.daily_pnl_pct);

        let check = risk.check_daily_loss_limit(&state);
        if check.tripped {
            error!(
                session_id = %report.session_id,
                daily_pnl_pct = check.daily_pnl_pct,
                "Circuit breaker tripped, session aborted"
            );
            report.circuit_breaker = true;
            report.error = Some(
                TradingError::CircuitBreakerTripped {
                    daily_pnl_pct: check.daily_pnl_pct,
                }
                .to_string(),
            );
            return Ok(());
        }

        let tickers = self.target_tickers(decision_type, &state, ticker.as_deref()).await?;
        let composites = self.ctx.signals.aggregate_many(&tickers).await;
        let signals: Vec<_> = composites.iter().map(|c| c.summary()).collect();
        report.signals_analyzed = signals.len();

        let additional_context = ticker
            .as_ref()
            .map(|t| format!("Operator requested an on-demand analysis of {}.", t));
        let context = DecisionContext {
            decision_type,
            portfolio: state,
            signals,
            additional_context,
        };

        let functions = self.ctx.trading_functions(limits);
        let decided_at = Instant::now();
        let outcome = self.ctx.decision_engine.decide(&context, &functions).await;

        report.success = outcome.success;
        report.error = outcome.error.clone();
        report.executed_trades = outcome.executed_trade_count;
        report.successful_trades = outcome.successful_trade_count;
        report.confidence_score = Some(outcome.confidence_score);

        let record = decision_record(
            &context,
            &tickers,
            outcome,
            decided_at.elapsed().as_millis() as u64,
        );
        match self.ctx.decisions.append(&record).await {
            Ok(()) => report.decision_id = Some(record.id),
            Err(e) => error!(
                session_id = %report.session_id,
                "Failed to write decision record: {:#}",
                e
            ),
        }

        if let Err(e) = self.ctx.tracker.save_snapshot().await {
            warn!(session_id = %report.session_id, "Snapshot after session failed: {:#}", e);
        }

        Ok(())
    }

    async fn target_tickers(
        &self,
        decision_type: DecisionType,
        state: &PortfolioState,
        ticker: Option<&str>,
    ) -> Result<Vec<String>> {
        let tickers = match decision_type {
            DecisionType::PreMarket => {
                let config = self.ctx.signals.config();
                let mut trending = self.ctx.signals.trending_tickers(config.trending_limit).await;
                trending.truncate(config.pre_market_universe);
                trending
            }
            DecisionType::MidSession | DecisionType::PreClose => state.tickers(),
            DecisionType::OnDemand => match ticker {
                Some(t) if !t.is_empty() => vec![t.to_string()],
                _ => {
                    return Err(TradingError::InvalidInput(
                        "ON_DEMAND sessions need a ticker".to_string(),
                    )
                    .into())
                }
            },
        };

        info!(decision_type = %decision_type, tickers = ?tickers, "Session tickers selected");
        Ok(tickers)
    }

    /// Sell every position at or beyond the stop-loss threshold.
    ///
    /// Runs outside the decision loop and ignores the circuit breaker: exits
    /// are always allowed.
    pub async fn check_and_execute_stop_losses(&self) -> Result<Vec<StopLossExit>> {
        let risk = RiskManager::new(self.ctx.risk_limits());
        let state = self
            .ctx
            .tracker
            .current_state()
            .await
            .context("Failed to fetch portfolio state for stop-loss sweep")?;

        let triggers = risk.check_all_stop_losses(&state);
        if triggers.is_empty() {
            info!(positions = state.positions.len(), "Stop-loss sweep: nothing triggered");
            return Ok(Vec::new());
        }

        let mut exits = Vec::with_capacity(triggers.len());
        for trigger in triggers {
            warn!(
                ticker = %trigger.ticker,
                pnl_pct = trigger.pnl_pct,
                quantity = trigger.quantity,
                "Stop-loss exit"
            );

            let order = OrderRequest::market(&trigger.ticker, TradeAction::Sell, trigger.quantity);
            let result = self.ctx.broker.place_order(&order).await;

            let record = TradeRecord {
                id: Uuid::new_v4(),
                ticker: trigger.ticker.clone(),
                action: TradeAction::Sell,
                quantity: trigger.quantity,
                price: trigger.current_price,
                total_value: trigger.current_price * trigger.quantity as f64,
                order_type: OrderType::Market,
                status: if result.success {
                    TradeStatus::Filled
                } else {
                    TradeStatus::Rejected
                },
                order_id: result.order_id.clone(),
                error: result.error.clone(),
                executed_at: Utc::now(),
            };
            if let Err(e) = self.ctx.trades.append(record).await {
                error!(ticker = %trigger.ticker, "Failed to record stop-loss trade: {:#}", e);
            }

            exits.push(StopLossExit {
                ticker: trigger.ticker,
                quantity: trigger.quantity,
                pnl_pct: trigger.pnl_pct,
                success: result.success,
                order_id: result.order_id,
                error: result.error,
            });
        }

        Ok(exits)
    }

    pub async fn save_daily_snapshot(&self) -> Result<PortfolioSnapshot> {
        let snapshot = self.ctx.tracker.save_snapshot().await?;
        info!(
            date = %snapshot.snapshot_date,
            total_value = snapshot.total_value,
            daily_pnl_pct = snapshot.daily_pnl_pct,
            "Daily snapshot saved"
        );
        Ok(snapshot)
    }

    pub async fn refresh_access_token(&self) -> Result<()> {
        self.ctx
            .broker
            .refresh_access_token()
            .await
            .context("Access token refresh failed")
    }

    pub async fn latest_decision(&self) -> Result<Option<DecisionRecord>> {
        let mut latest = self.ctx.decisions.latest(1).await?;
        Ok(latest.pop())
    }
}

fn decision_record(
    context: &DecisionContext,
    tickers: &[String],
    outcome: DecisionOutcome,
    execution_time_ms: u64,
) -> DecisionRecord {
    let prompt_summary = format!(
        "{} session over {} ticker(s) [{}], portfolio ${:.2} with {} position(s)",
        context.decision_type,
        tickers.len(),
        tickers.join(", "),
        context.portfolio.total_value,
        context.portfolio.position_count(),
    );

    DecisionRecord {
        id: Uuid::new_v4(),
        decision_type: context.decision_type,
        prompt_summary,
        reasoning_text: outcome.reasoning,
        confidence_score: outcome.confidence_score,
        tool_call_log: outcome.tool_call_log,
        signals_used: context.signals.clone(),
        portfolio_state: context.portfolio.summary(),
        error: outcome.error,
        execution_time_ms,
        created_at: Utc::now(),
    }
}
