use crate::{from_json_text, parse_label, to_i64, to_json_text, to_u64, PgStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use common::DecisionRecord;
use decision_engine::DecisionLog;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

fn decision_from_row(row: &PgRow) -> Result<DecisionRecord> {
    let decision_type: String = row.try_get("decision_type")?;
    let tool_call_log: String = row.try_get("tool_call_log")?;
    let signals_used: String = row.try_get("signals_used")?;
    let portfolio_state: String = row.try_get("portfolio_state")?;

    Ok(DecisionRecord {
        id: row.try_get("id")?,
        decision_type: parse_label(&decision_type)?,
        prompt_summary: row.try_get("prompt_summary")?,
        reasoning_text: row.try_get("reasoning_text")?,
        confidence_score: row.try_get("confidence_score")?,
        tool_call_log: from_json_text(&tool_call_log)?,
        signals_used: from_json_text(&signals_used)?,
        portfolio_state: from_json_text(&portfolio_state)?,
        error: row.try_get("error")?,
        execution_time_ms: to_u64(row.try_get("execution_time_ms")?)?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl DecisionLog for PgStore {
    /// Plain INSERT: a second write of the same id fails on the primary key.
    async fn append(&self, record: &DecisionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO llm_decisions (
                id, decision_type, prompt_summary, reasoning_text, confidence_score,
                tool_call_log, signals_used, portfolio_state, error, execution_time_ms, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(record.decision_type.as_str())
        .bind(&record.prompt_summary)
        .bind(&record.reasoning_text)
        .bind(record.confidence_score)
        .bind(to_json_text(&record.tool_call_log)?)
        .bind(to_json_text(&record.signals_used)?)
        .bind(to_json_text(&record.portfolio_state)?)
        .bind(&record.error)
        .bind(to_i64(record.execution_time_ms)?)
        .bind(record.created_at)
        .execute(self.pool())
        .await
        .context("Failed to write decision record")?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DecisionRecord>> {
        let row = sqlx::query("SELECT * FROM llm_decisions WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .context("Failed to fetch decision record")?;

        row.as_ref().map(decision_from_row).transpose()
    }

    async fn latest(&self, limit: usize) -> Result<Vec<DecisionRecord>> {
        let rows = sqlx::query("SELECT * FROM llm_decisions ORDER BY created_at DESC LIMIT $1")
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(self.pool())
            .await
            .context("Failed to fetch decision records")?;

        rows.iter().map(decision_from_row).collect()
    }
}
