use crate::{parse_label, to_i64, to_u64, PgStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use execution::{TradeLog, TradeRecord};
use sqlx::postgres::PgRow;
use sqlx::Row;

fn trade_from_row(row: &PgRow) -> Result<TradeRecord> {
    let action: String = row.try_get("action")?;
    let order_type: String = row.try_get("order_type")?;
    let status: String = row.try_get("status")?;

    Ok(TradeRecord {
        id: row.try_get("id")?,
        ticker: row.try_get("ticker")?,
        action: parse_label(&action)?,
        quantity: to_u64(row.try_get("quantity")?)?,
        price: row.try_get("price")?,
        total_value: row.try_get("total_value")?,
        order_type: parse_label(&order_type)?,
        status: parse_label(&status)?,
        order_id: row.try_get("order_id")?,
        error: row.try_get("error")?,
        executed_at: row.try_get("executed_at")?,
    })
}

#[async_trait]
impl TradeLog for PgStore {
    async fn append(&self, record: TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, ticker, action, quantity, price, total_value,
                order_type, status, order_id, error, executed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(&record.ticker)
        .bind(record.action.as_str())
        .bind(to_i64(record.quantity)?)
        .bind(record.price)
        .bind(record.total_value)
        .bind(record.order_type.as_str())
        .bind(record.status.as_str())
        .bind(&record.order_id)
        .bind(&record.error)
        .bind(record.executed_at)
        .execute(self.pool())
        .await
        .context("Failed to record trade")?;

        Ok(())
    }

    async fn since(&self, cutoff: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE executed_at >= $1 ORDER BY executed_at DESC")
            .bind(cutoff)
            .fetch_all(self.pool())
            .await
            .context("Failed to fetch trade history")?;

        rows.iter().map(trade_from_row).collect()
    }
}
