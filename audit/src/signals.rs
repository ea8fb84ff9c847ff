use crate::{from_json_text, to_json_text, PgStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use signal_generation::{Signal, SignalSource, SignalStore};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

fn signal_from_row(row: &PgRow) -> Result<Signal> {
    let source: String = row.try_get("source")?;
    let data: String = row.try_get("data")?;

    Ok(Signal {
        id: row.try_get::<Uuid, _>("id")?,
        ticker: row.try_get("ticker")?,
        source: SignalSource::parse(&source)
            .with_context(|| format!("Unknown signal source '{}'", source))?,
        sentiment_score: row.try_get("sentiment_score")?,
        strength: row.try_get("strength")?,
        data: from_json_text(&data)?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[async_trait::async_trait]
impl SignalStore for PgStore {
    async fn store(&self, signal: &Signal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signals (id, ticker, source, sentiment_score, strength, data, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(signal.id)
        .bind(&signal.ticker)
        .bind(signal.source.as_str())
        .bind(signal.sentiment_score)
        .bind(signal.strength)
        .bind(to_json_text(&signal.data)?)
        .bind(signal.created_at)
        .bind(signal.expires_at)
        .execute(self.pool())
        .await
        .context("Failed to store signal")?;

        Ok(())
    }

    async fn by_ticker_since(&self, ticker: &str, since: DateTime<Utc>) -> Result<Vec<Signal>> {
        let rows = sqlx::query(
            "SELECT * FROM signals WHERE ticker = $1 AND created_at >= $2 ORDER BY created_at DESC",
        )
        .bind(ticker)
        .bind(since)
        .fetch_all(self.pool())
        .await
        .context("Failed to fetch signals")?;

        rows.iter().map(signal_from_row).collect()
    }
}
