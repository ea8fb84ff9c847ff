//! PostgreSQL persistence for every append-record store
//!
//! One `PgStore` implements the signal, snapshot, trade and decision stores.
//! Structured columns (positions, tool-call logs) are stored as JSON text.

mod decisions;
mod signals;
mod snapshots;
mod trades;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS signals (
    id UUID PRIMARY KEY,
    ticker TEXT NOT NULL,
    source TEXT NOT NULL,
    sentiment_score DOUBLE PRECISION NOT NULL,
    strength DOUBLE PRECISION NOT NULL,
    data TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_signals_ticker_time ON signals(ticker, created_at DESC);

CREATE TABLE IF NOT EXISTS portfolio_snapshots (
    snapshot_date DATE PRIMARY KEY,
    opening_value DOUBLE PRECISION NOT NULL,
    total_value DOUBLE PRECISION NOT NULL,
    cash_balance DOUBLE PRECISION NOT NULL,
    holdings_value DOUBLE PRECISION NOT NULL,
    daily_pnl DOUBLE PRECISION NOT NULL,
    daily_pnl_pct DOUBLE PRECISION NOT NULL,
    total_pnl DOUBLE PRECISION NOT NULL,
    total_pnl_pct DOUBLE PRECISION NOT NULL,
    positions TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS trades (
    id UUID PRIMARY KEY,
    ticker TEXT NOT NULL,
    action TEXT NOT NULL,
    quantity BIGINT NOT NULL,
    price DOUBLE PRECISION NOT NULL,
    total_value DOUBLE PRECISION NOT NULL,
    order_type TEXT NOT NULL,
    status TEXT NOT NULL,
    order_id TEXT,
    error TEXT,
    executed_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trades_time ON trades(executed_at DESC);

CREATE TABLE IF NOT EXISTS llm_decisions (
    id UUID PRIMARY KEY,
    decision_type TEXT NOT NULL,
    prompt_summary TEXT NOT NULL,
    reasoning_text TEXT NOT NULL,
    confidence_score DOUBLE PRECISION NOT NULL,
    tool_call_log TEXT NOT NULL,
    signals_used TEXT NOT NULL,
    portfolio_state TEXT NOT NULL,
    error TEXT,
    execution_time_ms BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_decisions_time ON llm_decisions(created_at DESC);
"#;

/// Postgres-backed audit and history store
#[derive(Clone)]
pub struct PgStore {
    db_pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Create tables and indexes if they are missing
    pub async fn initialize(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(self.pool())
            .await
            .context("Failed to create audit tables")?;

        info!("Audit tables initialized");
        Ok(())
    }

    fn pool(&self) -> &PgPool {
        self.db_pool.as_ref()
    }
}

fn to_json_text<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to encode JSON column")
}

fn from_json_text<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).context("Failed to decode JSON column")
}

/// Decode an enum stored as its serde string form (e.g. `"BUY"`, `"PRE_MARKET"`)
fn parse_label<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .with_context(|| format!("Unrecognized stored value '{}'", raw))
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).context("Value out of range for BIGINT column")
}

fn to_u64(value: i64) -> Result<u64> {
    u64::try_from(value).context("Negative value in unsigned column")
}
