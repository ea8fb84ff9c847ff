//! Append-only audit log of decision records

use async_trait::async_trait;
use common::{DecisionRecord, Uuid};
use tokio::sync::RwLock;

#[async_trait]
pub trait DecisionLog: Send + Sync {
    /// Records are immutable once appended.
    async fn append(&self, record: &DecisionRecord) -> anyhow::Result<()>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<DecisionRecord>>;

    /// Most recent records first.
    async fn latest(&self, limit: usize) -> anyhow::Result<Vec<DecisionRecord>>;
}

#[derive(Default)]
pub struct InMemoryDecisionLog {
    records: RwLock<Vec<DecisionRecord>>,
}

impl InMemoryDecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl DecisionLog for InMemoryDecisionLog {
    async fn append(&self, record: &DecisionRecord) -> anyhow::Result<()> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id == record.id) {
            anyhow::bail!("decision record {} already written", record.id);
        }
        records.push(record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<DecisionRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn latest(&self, limit: usize) -> anyhow::Result<Vec<DecisionRecord>> {
        let records = self.records.read().await;
        let mut recent: Vec<DecisionRecord> = records.clone();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(limit);
        Ok(recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use common::{DecisionType, PortfolioSummary};

    fn record(minutes_ago: i64) -> DecisionRecord {
        DecisionRecord {
            id: Uuid::new_v4(),
            decision_type: DecisionType::MidSession,
            prompt_summary: "MID_SESSION".to_string(),
            reasoning_text: "Held all positions.".to_string(),
            confidence_score: 0.5,
            tool_call_log: vec![],
            signals_used: vec![],
            portfolio_state: PortfolioSummary {
                total_value: 1000.0,
                cash_balance: 1000.0,
                position_count: 0,
                daily_pnl_pct: 0.0,
            },
            error: None,
            execution_time_ms: 12,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn test_latest_is_newest_first() {
        let log = InMemoryDecisionLog::new();
        let older = record(30);
        let newer = record(5);
        log.append(&older).await.unwrap();
        log.append(&newer).await.unwrap();

        let latest = log.latest(1).await.unwrap();
        assert_eq!(latest[0].id, newer.id);
        assert_eq!(log.get(older.id).await.unwrap().unwrap().id, older.id);
    }

    #[tokio::test]
    async fn test_records_are_never_overwritten() {
        let log = InMemoryDecisionLog::new();
        let r = record(0);
        log.append(&r).await.unwrap();
        assert!(log.append(&r).await.is_err());
        assert_eq!(log.len().await, 1);
    }
}
