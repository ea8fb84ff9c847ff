use anyhow::{Context, Result};
use common::DecisionType;
use std::sync::Arc;
use tracing::{error, info};
use trading_engine::{AppConfig, AppContext, Scheduler, TradingEngine};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level())
        .init();

    info!("🚀 Starting trading engine");

    let scheduler_config = config.scheduler.clone();
    let ctx = Arc::new(AppContext::build(config).await?);
    let engine = TradingEngine::new(ctx);

    // `run-once <SESSION>` fires a single session and exits
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("run-once") {
        let target = args.get(1).context("usage: trading-engine run-once <SESSION|TICKER>")?;
        let report = match target.parse::<DecisionType>() {
            Ok(decision_type) => engine.run_session(decision_type).await,
            Err(_) => engine.analyze_ticker_on_demand(target).await,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let scheduler = Scheduler::new(engine, &scheduler_config)?;
    let handle = scheduler.handle();
    let mut scheduler_task = tokio::spawn(scheduler.run());

    if scheduler_config.autostart {
        handle.start().await?;
    }

    tokio::select! {
        result = &mut scheduler_task => {
            match result {
                Ok(Ok(())) => info!("Scheduler exited"),
                Ok(Err(e)) => error!("Scheduler failed: {:#}", e),
                Err(e) => error!("Scheduler task panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("👋 Shutting down gracefully...");
            handle.shutdown().await?;
            scheduler_task.await??;
        }
    }

    Ok(())
}
