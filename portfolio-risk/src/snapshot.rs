// Daily portfolio snapshot persistence

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use common::Position;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row per trading day. Re-saving the same day overwrites the closing
/// figures but keeps `opening_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub snapshot_date: NaiveDate,
    pub opening_value: f64,
    pub total_value: f64,
    pub cash_balance: f64,
    pub holdings_value: f64,
    pub daily_pnl: f64,
    pub daily_pnl_pct: f64,
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
    pub positions: Vec<Position>,
    pub updated_at: DateTime<Utc>,
}

/// Trait for snapshot storage backends
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or replace the snapshot for `snapshot.snapshot_date`
    async fn upsert(&self, snapshot: &PortfolioSnapshot) -> Result<()>;

    async fn get(&self, date: NaiveDate) -> Result<Option<PortfolioSnapshot>>;

    /// Most recent snapshot dated strictly before `date`
    async fn latest_before(&self, date: NaiveDate) -> Result<Option<PortfolioSnapshot>>;

    /// Up to `limit` snapshots, newest first
    async fn recent(&self, limit: usize) -> Result<Vec<PortfolioSnapshot>>;
}

/// In-memory snapshot storage (for paper trading and tests)
pub struct InMemorySnapshotStore {
    snapshots: tokio::sync::RwLock<BTreeMap<NaiveDate, PortfolioSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            snapshots: tokio::sync::RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn count(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn upsert(&self, snapshot: &PortfolioSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.snapshot_date, snapshot.clone());
        Ok(())
    }

    async fn get(&self, date: NaiveDate) -> Result<Option<PortfolioSnapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(&date).cloned())
    }

    async fn latest_before(&self, date: NaiveDate) -> Result<Option<PortfolioSnapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.range(..date).next_back().map(|(_, s)| s.clone()))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<PortfolioSnapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.values().rev().take(limit).cloned().collect())
    }
}
