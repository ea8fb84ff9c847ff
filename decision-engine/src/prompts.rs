//! Session prompts for the decision model

use common::{DecisionType, PortfolioState, SignalSummary};
use portfolio_risk::RiskLimits;
use std::fmt::Write;

/// Signals beyond this many are left out of the prompt
pub const MAX_PROMPT_SIGNALS: usize = 10;

/// Standing instructions shared by every session type.
pub fn system_prompt(limits: &RiskLimits) -> String {
    format!(
        "You are an expert trading assistant managing a US equity portfolio.\n\
         \n\
         RISK LIMITS (ENFORCED BY THE SYSTEM):\n\
         {}\n\
         Orders that breach a limit are refused outright; they are never resized for you.\n\
         \n\
         YOUR GOALS:\n\
         1. Maximize returns while respecting risk limits\n\
         2. Base decisions on the signal sources, not on hunches\n\
         3. Be conservative: only trade when confidence is high\n\
         4. Explain your reasoning clearly\n\
         \n\
         AVAILABLE FUNCTIONS:\n\
         - check_balance(): account cash and total value\n\
         - get_current_price(ticker): latest price for a ticker\n\
         - get_portfolio_status(): positions, P/L and exposure\n\
         - execute_trade(ticker, action, quantity, order_type, limit_price?): place a real order\n\
         - analyze_signals(ticker, hours_back?): sentiment, technical and analyst signals\n\
         - calculate_position_size(ticker, confidence, price): risk-bounded share count\n\
         - check_stop_loss_triggers(): positions past their stop-loss\n\
         - get_trading_history(days_back?): recent trades and win rate\n\
         \n\
         DECISION PROCESS:\n\
         1. Gather current portfolio and market data\n\
         2. Analyze signals and identify opportunities\n\
         3. Size positions with calculate_position_size before buying\n\
         4. Execute trades only when conditions are favorable\n\
         5. Finish with a plain-text summary stating your confidence level",
        limits.describe()
    )
}

/// Objectives and approach for one session type.
pub fn session_instructions(decision_type: DecisionType) -> &'static str {
    match decision_type {
        DecisionType::PreMarket => {
            "DECISION TYPE: PRE-MARKET (shortly before the open)\n\
             \n\
             OBJECTIVES:\n\
             - Review overnight signals from social sentiment, news and analyst reports\n\
             - Identify strong entry opportunities for today\n\
             - Plan opening positions by signal strength\n\
             \n\
             APPROACH:\n\
             1. Check portfolio status and available cash\n\
             2. Review the trending tickers listed below\n\
             3. Analyze technical indicators and news sentiment\n\
             4. Pick at most 2-3 high-conviction opportunities\n\
             5. Size each position from your confidence\n\
             6. Execute BUY orders for the selected tickers"
        }
        DecisionType::MidSession => {
            "DECISION TYPE: MID-SESSION (about two hours after the open)\n\
             \n\
             OBJECTIVES:\n\
             - Review current positions and P/L\n\
             - Take profits where they are available\n\
             - Check for new signals that emerged during trading\n\
             \n\
             APPROACH:\n\
             1. Check portfolio performance so far today\n\
             2. Review each position's P/L percentage\n\
             3. Consider selling positions up 10% or more\n\
             4. Check for stop-loss triggers\n\
             5. Analyze new signals for additional opportunities\n\
             6. Execute BUY or SELL orders as needed"
        }
        DecisionType::PreClose => {
            "DECISION TYPE: PRE-CLOSE (shortly before the close)\n\
             \n\
             OBJECTIVES:\n\
             - Review daily performance\n\
             - Decide which positions to hold overnight\n\
             - Reduce overnight risk by closing weak or risky positions\n\
             \n\
             APPROACH:\n\
             1. Review all open positions and daily P/L\n\
             2. Check news for after-hours catalysts\n\
             3. Decide HOLD or SELL position by position\n\
             4. Close positions with weak signals or high risk\n\
             5. Keep only high-conviction positions overnight"
        }
        DecisionType::OnDemand => {
            "DECISION TYPE: ON-DEMAND ANALYSIS\n\
             \n\
             OBJECTIVES:\n\
             - Analyze the requested ticker in depth\n\
             - Decide whether to enter, add, trim or exit\n\
             \n\
             APPROACH:\n\
             1. Check the current position and cash available\n\
             2. Analyze the ticker's signals and current price\n\
             3. Trade only if the signals clearly support it"
        }
    }
}

/// The opening user message: instructions, portfolio, signals, extra context.
pub fn session_prompt(
    decision_type: DecisionType,
    portfolio: &PortfolioState,
    signals: &[SignalSummary],
    additional_context: Option<&str>,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(session_instructions(decision_type));
    prompt.push_str("\n\n");

    let _ = writeln!(prompt, "CURRENT PORTFOLIO:");
    let _ = writeln!(prompt, "- Total Value: {:.2}", portfolio.total_value);
    let _ = writeln!(prompt, "- Cash Balance: {:.2}", portfolio.cash_balance);
    let _ = writeln!(prompt, "- Holdings Value: {:.2}", portfolio.holdings_value);
    let _ = writeln!(
        prompt,
        "- Daily P/L: {:.2} ({:.2}%)",
        portfolio.daily_pnl, portfolio.daily_pnl_pct
    );
    let _ = writeln!(
        prompt,
        "- Total P/L: {:.2} ({:.2}%)",
        portfolio.total_pnl, portfolio.total_pnl_pct
    );
    let _ = writeln!(prompt, "- Open Positions: {}", portfolio.position_count());
    for position in &portfolio.positions {
        let _ = writeln!(
            prompt,
            "  - {}: {} shares @ {:.2} (now {:.2}, {:+.2}%)",
            position.ticker,
            position.quantity,
            position.avg_cost,
            position.current_price,
            position.unrealized_pnl_pct
        );
    }

    prompt.push_str("\nMARKET SIGNALS:\n");
    if signals.is_empty() {
        prompt.push_str("- none available\n");
    }
    for signal in signals.iter().take(MAX_PROMPT_SIGNALS) {
        let _ = writeln!(
            prompt,
            "- {}: {} (sentiment: {:.2}, strength: {:.2})",
            signal.ticker, signal.recommendation, signal.composite_sentiment, signal.signal_strength
        );
    }

    if let Some(context) = additional_context.filter(|c| !c.trim().is_empty()) {
        let _ = write!(prompt, "\nADDITIONAL CONTEXT:\n{}\n", context.trim());
    }

    prompt.push_str(
        "\nUse the available functions to make your trading decision. Think step-by-step:\n\
         1. Gather current data (balance, portfolio, prices)\n\
         2. Analyze signals for each potential trade\n\
         3. Calculate appropriate position sizes\n\
         4. Execute trades with clear reasoning\n\
         5. Summarize your decisions and confidence level\n",
    );

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{Position, Recommendation};

    fn portfolio() -> PortfolioState {
        PortfolioState {
            timestamp: Utc::now(),
            cash_balance: 5_000.0,
            holdings_value: 1_100.0,
            total_value: 6_100.0,
            positions: vec![Position::new("AAPL", 10, 100.0, 110.0)],
            daily_pnl: 100.0,
            daily_pnl_pct: 1.67,
            total_pnl: 100.0,
            total_pnl_pct: 1.67,
        }
    }

    fn signal(ticker: &str) -> SignalSummary {
        SignalSummary {
            ticker: ticker.to_string(),
            composite_sentiment: 0.8,
            signal_strength: 0.9,
            recommendation: Recommendation::StrongBuy,
        }
    }

    #[test]
    fn test_system_prompt_carries_limits() {
        let prompt = system_prompt(&RiskLimits {
            max_position_size_pct: 25.0,
            daily_loss_limit_pct: 10.0,
            stop_loss_pct: 15.0,
        });
        assert!(prompt.contains("25% of total assets"));
        assert!(prompt.contains("-10% daily P/L"));
        assert!(prompt.contains("-15% from average cost"));
    }

    #[test]
    fn test_session_prompt_per_type() {
        let pf = portfolio();
        assert!(session_prompt(DecisionType::PreMarket, &pf, &[], None).contains("2-3 high-conviction"));
        assert!(session_prompt(DecisionType::MidSession, &pf, &[], None).contains("up 10% or more"));
        assert!(session_prompt(DecisionType::PreClose, &pf, &[], None).contains("overnight risk"));
    }

    #[test]
    fn test_signals_are_capped_and_context_appended() {
        let signals: Vec<SignalSummary> = (0..15).map(|i| signal(&format!("T{}", i))).collect();
        let prompt = session_prompt(
            DecisionType::OnDemand,
            &portfolio(),
            &signals,
            Some("Focus on T3"),
        );

        assert!(prompt.contains("- T9: STRONG_BUY (sentiment: 0.80, strength: 0.90)"));
        assert!(!prompt.contains("- T10:"));
        assert!(prompt.contains("ADDITIONAL CONTEXT:\nFocus on T3"));
        assert!(prompt.contains("AAPL: 10 shares @ 100.00 (now 110.00, +10.00%)"));
    }
}
