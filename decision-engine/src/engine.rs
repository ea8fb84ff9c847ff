//! Bounded tool-calling loop between the decision model and the trading functions

use crate::confidence::ConfidenceLevel;
use crate::llm::{ChatMessage, CompletionRequest, LlmClient, LlmConfig, LlmResponse};
use crate::prompts;
use crate::tools::{TradingFunctions, EXECUTE_TRADE};
use anyhow::Context;
use chrono::Utc;
use common::{DecisionType, PortfolioState, SignalSummary, ToolCall, TradingError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Inputs for one decision session
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub decision_type: DecisionType,
    pub portfolio: PortfolioState,
    pub signals: Vec<SignalSummary>,
    pub additional_context: Option<String>,
}

/// Result of one run of the tool-calling loop.
///
/// `tool_call_log` is populated even when the run failed part-way; trades
/// placed before the failure stay placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub success: bool,
    pub decision_type: DecisionType,
    pub error: Option<String>,
    pub reasoning: String,
    pub confidence_level: ConfidenceLevel,
    pub confidence_score: f64,
    pub tool_call_log: Vec<ToolCall>,
    pub executed_trade_count: usize,
    pub successful_trade_count: usize,
    /// Model turns taken
    pub iterations: usize,
    pub hit_iteration_cap: bool,
}

impl DecisionOutcome {
    fn new(decision_type: DecisionType, tool_call_log: Vec<ToolCall>) -> Self {
        let executed: Vec<&ToolCall> = tool_call_log
            .iter()
            .filter(|c| c.function_name == EXECUTE_TRADE)
            .collect();
        let executed_trade_count = executed.len();
        let successful_trade_count = executed.iter().filter(|c| c.succeeded()).count();

        Self {
            success: false,
            decision_type,
            error: None,
            reasoning: String::new(),
            confidence_level: ConfidenceLevel::Unknown,
            confidence_score: 0.0,
            tool_call_log,
            executed_trade_count,
            successful_trade_count,
            iterations: 0,
            hit_iteration_cap: false,
        }
    }

    pub fn summary(&self) -> String {
        match &self.error {
            Some(error) => format!(
                "{} failed after {} trade(s): {}",
                self.decision_type, self.executed_trade_count, error
            ),
            None => format!(
                "Executed {}/{} trades with {:.0}% confidence",
                self.successful_trade_count,
                self.executed_trade_count,
                self.confidence_score * 100.0
            ),
        }
    }
}

/// How the loop ended when no error occurred
struct LoopEnd {
    iterations: usize,
    capped: bool,
}

/// Drives the conversation with the decision model.
pub struct DecisionEngine {
    llm: Arc<dyn LlmClient>,
    config: LlmConfig,
    call_timeout: Duration,
}

impl DecisionEngine {
    pub fn new(llm: Arc<dyn LlmClient>, config: LlmConfig) -> Self {
        let call_timeout = Duration::from_secs(config.timeout_secs);
        Self {
            llm,
            config,
            call_timeout,
        }
    }

    /// Override the per-call bound, mainly for tests.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn model_name(&self) -> &str {
        self.llm.name()
    }

    /// Run one session. Never returns an error: failures are reported on the
    /// outcome with `success = false`.
    pub async fn decide(
        &self,
        context: &DecisionContext,
        functions: &TradingFunctions,
    ) -> DecisionOutcome {
        info!(
            decision_type = %context.decision_type,
            model = self.llm.name(),
            signals = context.signals.len(),
            "Starting decision loop"
        );

        let mut log = Vec::new();
        let mut last_text: Option<String> = None;
        let result = self
            .run_loop(context, functions, &mut log, &mut last_text)
            .await;

        let mut outcome = DecisionOutcome::new(context.decision_type, log);
        match result {
            Ok(end) => {
                let reasoning = last_text.unwrap_or_else(|| {
                    format!(
                        "Stopped after {} model turns without a final summary.",
                        end.iterations
                    )
                });
                let level = ConfidenceLevel::classify(&reasoning);

                outcome.success = true;
                outcome.reasoning = reasoning;
                outcome.confidence_level = level;
                outcome.confidence_score = level.score();
                outcome.iterations = end.iterations;
                outcome.hit_iteration_cap = end.capped;
                info!(
                    decision_type = %context.decision_type,
                    iterations = end.iterations,
                    "Decision completed: {}",
                    outcome.summary()
                );
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!(decision_type = %context.decision_type, "Decision loop failed: {}", message);
                outcome.error = Some(message);
                outcome.reasoning = last_text.unwrap_or_default();
            }
        }
        outcome
    }

    async fn run_loop(
        &self,
        context: &DecisionContext,
        functions: &TradingFunctions,
        log: &mut Vec<ToolCall>,
        last_text: &mut Option<String>,
    ) -> anyhow::Result<LoopEnd> {
        let mut request = CompletionRequest {
            messages: vec![
                ChatMessage::system(prompts::system_prompt(functions.risk().limits())),
                ChatMessage::user(prompts::session_prompt(
                    context.decision_type,
                    &context.portfolio,
                    &context.signals,
                    context.additional_context.as_deref(),
                )),
            ],
            tools: TradingFunctions::definitions(),
        };

        let max_iterations = self.config.max_iterations.max(1);
        for iteration in 1..=max_iterations {
            let response = self.call_model(&request).await?;

            if let Some(text) = response.non_empty_text() {
                *last_text = Some(text.to_string());
            }
            if response.tool_calls.is_empty() {
                return Ok(LoopEnd {
                    iterations: iteration,
                    capped: false,
                });
            }

            // Requests from the last permitted call are not run.
            if iteration == max_iterations {
                let skipped: Vec<&str> =
                    response.tool_calls.iter().map(|c| c.name.as_str()).collect();
                warn!(
                    decision_type = %context.decision_type,
                    max_iterations,
                    skipped = ?skipped,
                    "Tool-call cap reached, final turn's tool calls not executed"
                );
                break;
            }

            request.messages.push(ChatMessage::assistant(
                response.text.clone(),
                response.tool_calls.clone(),
            ));

            // Sequential on purpose: each result may inform the next call.
            for call in &response.tool_calls {
                let result = functions.dispatch(&call.name, &call.arguments).await;
                request
                    .messages
                    .push(ChatMessage::tool_result(call.id.clone(), &result));
                log.push(ToolCall {
                    function_name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    result,
                    timestamp: Utc::now(),
                });
            }
        }

        Ok(LoopEnd {
            iterations: max_iterations,
            capped: true,
        })
    }

    async fn call_model(&self, request: &CompletionRequest) -> anyhow::Result<LlmResponse> {
        match tokio::time::timeout(self.call_timeout, self.llm.complete(request)).await {
            Ok(result) => result.with_context(|| format!("{} completion failed", self.llm.name())),
            Err(_) => Err(TradingError::Timeout {
                operation: "LLM call".to_string(),
                secs: self.call_timeout.as_secs(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCallRequest;
    use crate::scripted::ScriptedLlm;
    use crate::tools::CALCULATE_POSITION_SIZE;
    use execution::{InMemoryTradeLog, PaperBroker};
    use portfolio_risk::{InMemorySnapshotStore, PortfolioTracker, RiskLimits, RiskManager};
    use serde_json::json;
    use signal_generation::{FixedFeeds, InMemorySignalStore, SignalAggregator, SignalsConfig};

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    async fn setup(cash: f64) -> (Arc<PaperBroker>, TradingFunctions, DecisionContext) {
        let broker = Arc::new(PaperBroker::with_cash(cash));
        let feeds = Arc::new(FixedFeeds::new());
        let signals = Arc::new(SignalAggregator::new(
            feeds.clone(),
            feeds.clone(),
            feeds,
            Arc::new(InMemorySignalStore::new()),
            SignalsConfig::default(),
        ));
        let tracker = PortfolioTracker::new(
            broker.clone(),
            Arc::new(InMemorySnapshotStore::new()),
            cash,
            chrono_tz::America::New_York,
        );
        let portfolio = tracker.current_state().await.unwrap();
        let functions = TradingFunctions::new(
            tracker,
            RiskManager::new(RiskLimits::default()),
            signals,
            Arc::new(InMemoryTradeLog::new()),
        );
        let context = DecisionContext {
            decision_type: DecisionType::PreMarket,
            portfolio,
            signals: vec![],
            additional_context: None,
        };
        (broker, functions, context)
    }

    #[tokio::test]
    async fn test_sizes_then_buys() {
        let (broker, functions, context) = setup(800_000.0).await;
        broker.set_price("X", 100.0);

        let llm = Arc::new(ScriptedLlm::new(vec![
            LlmResponse::tools(vec![call(
                "c1",
                CALCULATE_POSITION_SIZE,
                json!({"ticker": "X", "confidence": 0.8, "price": 100.0}),
            )]),
            LlmResponse::tools(vec![call(
                "c2",
                EXECUTE_TRADE,
                json!({"ticker": "X", "action": "BUY", "quantity": 2560, "order_type": "MARKET"}),
            )]),
            LlmResponse::text("Bought 2560 X on a strong signal."),
        ]));
        let engine = DecisionEngine::new(llm.clone(), LlmConfig::default());

        let outcome = engine.decide(&context, &functions).await;

        assert!(outcome.success);
        assert_eq!(outcome.tool_call_log.len(), 2);
        assert_eq!(outcome.tool_call_log[0].result["recommended_quantity"], 2560);
        assert_eq!(outcome.executed_trade_count, 1);
        assert_eq!(outcome.successful_trade_count, 1);
        assert_eq!(outcome.confidence_score, 0.8);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(broker.orders_placed(), 1);

        // Tool results are fed back keyed by call id
        let requests = llm.requests().await;
        let last = requests.last().unwrap();
        assert_eq!(last.messages.len(), 6);
        assert_eq!(last.messages[5].tool_call_id.as_deref(), Some("c2"));
        assert_eq!(last.tools.len(), 8);
    }

    #[tokio::test]
    async fn test_multiple_calls_in_one_turn_keep_order() {
        let (_broker, functions, context) = setup(10_000.0).await;
        let llm = Arc::new(ScriptedLlm::new(vec![LlmResponse::tools(vec![
            call("a", "check_balance", json!({})),
            call("b", "get_portfolio_status", json!({})),
            call("c", "get_trading_history", json!({"days_back": 3})),
        ])]));

        let outcome = DecisionEngine::new(llm, LlmConfig::default())
            .decide(&context, &functions)
            .await;

        let names: Vec<&str> = outcome
            .tool_call_log
            .iter()
            .map(|c| c.function_name.as_str())
            .collect();
        assert_eq!(names, vec!["check_balance", "get_portfolio_status", "get_trading_history"]);
        assert_eq!(outcome.reasoning, "No further actions.");
    }

    #[tokio::test]
    async fn test_iteration_cap_finalizes_without_error() {
        let (_broker, functions, context) = setup(10_000.0).await;
        let llm = Arc::new(ScriptedLlm::repeating(vec![LlmResponse {
            text: Some("Still checking, moderate conviction.".to_string()),
            tool_calls: vec![call("loop", "check_balance", json!({}))],
        }]));

        let outcome = DecisionEngine::new(llm.clone(), LlmConfig::default())
            .decide(&context, &functions)
            .await;

        assert!(outcome.success);
        assert!(outcome.hit_iteration_cap);
        assert_eq!(outcome.iterations, 10);
        assert_eq!(llm.call_count().await, 10);
        // The tenth turn's request is never run since no reply could follow
        assert_eq!(outcome.tool_call_log.len(), 9);
        assert_eq!(outcome.reasoning, "Still checking, moderate conviction.");
        assert_eq!(outcome.confidence_level, ConfidenceLevel::Moderate);
    }

    #[tokio::test]
    async fn test_trade_requested_on_final_turn_is_not_placed() {
        let (broker, functions, context) = setup(100_000.0).await;
        broker.set_price("AAPL", 100.0);

        let llm = Arc::new(ScriptedLlm::new(vec![
            LlmResponse::tools(vec![call("c1", "check_balance", json!({}))]),
            LlmResponse::tools(vec![call(
                "c2",
                EXECUTE_TRADE,
                json!({"ticker": "AAPL", "action": "BUY", "quantity": 5, "order_type": "MARKET"}),
            )]),
        ]));
        let config = LlmConfig {
            max_iterations: 2,
            ..LlmConfig::default()
        };

        let outcome = DecisionEngine::new(llm, config).decide(&context, &functions).await;

        assert!(outcome.success);
        assert!(outcome.hit_iteration_cap);
        assert_eq!(outcome.tool_call_log.len(), 1);
        assert_eq!(outcome.executed_trade_count, 0);
        assert_eq!(broker.orders_placed(), 0);
    }

    #[tokio::test]
    async fn test_failure_keeps_executed_trades() {
        let (broker, functions, context) = setup(100_000.0).await;
        broker.set_price("AAPL", 100.0);

        let llm = Arc::new(
            ScriptedLlm::new(vec![LlmResponse::tools(vec![call(
                "c1",
                EXECUTE_TRADE,
                json!({"ticker": "AAPL", "action": "BUY", "quantity": 5, "order_type": "MARKET"}),
            )])])
            .then_fail("provider unavailable"),
        );

        let outcome = DecisionEngine::new(llm, LlmConfig::default())
            .decide(&context, &functions)
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("provider unavailable"));
        assert_eq!(outcome.successful_trade_count, 1);
        assert_eq!(broker.orders_placed(), 1);
    }

    #[tokio::test]
    async fn test_model_call_timeout() {
        let (_broker, functions, context) = setup(10_000.0).await;
        let llm = Arc::new(
            ScriptedLlm::new(vec![LlmResponse::text("late")]).with_delay(Duration::from_millis(500)),
        );

        let outcome = DecisionEngine::new(llm, LlmConfig::default())
            .with_call_timeout(Duration::from_millis(20))
            .decide(&context, &functions)
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("timed out"));
        assert!(outcome.tool_call_log.is_empty());
    }
}
