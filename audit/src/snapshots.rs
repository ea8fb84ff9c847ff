use crate::{from_json_text, to_json_text, PgStore};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use portfolio_risk::{PortfolioSnapshot, SnapshotStore};
use sqlx::postgres::PgRow;
use sqlx::Row;

fn snapshot_from_row(row: &PgRow) -> Result<PortfolioSnapshot> {
    let positions: String = row.try_get("positions")?;

    Ok(PortfolioSnapshot {
        snapshot_date: row.try_get("snapshot_date")?,
        opening_value: row.try_get("opening_value")?,
        total_value: row.try_get("total_value")?,
        cash_balance: row.try_get("cash_balance")?,
        holdings_value: row.try_get("holdings_value")?,
        daily_pnl: row.try_get("daily_pnl")?,
        daily_pnl_pct: row.try_get("daily_pnl_pct")?,
        total_pnl: row.try_get("total_pnl")?,
        total_pnl_pct: row.try_get("total_pnl_pct")?,
        positions: from_json_text(&positions)?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait::async_trait]
impl SnapshotStore for PgStore {
    async fn upsert(&self, snapshot: &PortfolioSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO portfolio_snapshots (
                snapshot_date, opening_value, total_value, cash_balance, holdings_value,
                daily_pnl, daily_pnl_pct, total_pnl, total_pnl_pct, positions, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (snapshot_date)
            DO UPDATE SET
                opening_value = EXCLUDED.opening_value,
                total_value = EXCLUDED.total_value,
                cash_balance = EXCLUDED.cash_balance,
                holdings_value = EXCLUDED.holdings_value,
                daily_pnl = EXCLUDED.daily_pnl,
                daily_pnl_pct = EXCLUDED.daily_pnl_pct,
                total_pnl = EXCLUDED.total_pnl,
                total_pnl_pct = EXCLUDED.total_pnl_pct,
                positions = EXCLUDED.positions,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(snapshot.snapshot_date)
        .bind(snapshot.opening_value)
        .bind(snapshot.total_value)
        .bind(snapshot.cash_balance)
        .bind(snapshot.holdings_value)
        .bind(snapshot.daily_pnl)
        .bind(snapshot.daily_pnl_pct)
        .bind(snapshot.total_pnl)
        .bind(snapshot.total_pnl_pct)
        .bind(to_json_text(&snapshot.positions)?)
        .bind(snapshot.updated_at)
        .execute(self.pool())
        .await
        .context("Failed to upsert portfolio snapshot")?;

        Ok(())
    }

    async fn get(&self, date: NaiveDate) -> Result<Option<PortfolioSnapshot>> {
        let row = sqlx::query("SELECT * FROM portfolio_snapshots WHERE snapshot_date = $1")
            .bind(date)
            .fetch_optional(self.pool())
            .await
            .context("Failed to fetch portfolio snapshot")?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn latest_before(&self, date: NaiveDate) -> Result<Option<PortfolioSnapshot>> {
        let row = sqlx::query(
            "SELECT * FROM portfolio_snapshots WHERE snapshot_date < $1 ORDER BY snapshot_date DESC LIMIT 1",
        )
        .bind(date)
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch previous portfolio snapshot")?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn recent(&self, limit: usize) -> Result<Vec<PortfolioSnapshot>> {
        let rows = sqlx::query(
            "SELECT * FROM portfolio_snapshots ORDER BY snapshot_date DESC LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool())
        .await
        .context("Failed to fetch portfolio snapshots")?;

        rows.iter().map(snapshot_from_row).collect()
    }
}
