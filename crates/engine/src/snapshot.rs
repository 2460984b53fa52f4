use chrono::{DateTime, Utc};
use core_types::{Alert, SignalKind, Timeframe};
use serde::Serialize;
use signals::ZoneState;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A copy of the engine's externally visible state, taken after a cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineSnapshot {
    pub symbol: String,
    pub cycles: u64,
    pub updated_at: Option<DateTime<Utc>>,
    /// Latest close of the primary timeframe.
    pub price: Option<f64>,
    pub rsi_by_timeframe: BTreeMap<Timeframe, f64>,
    pub zones: BTreeMap<Timeframe, ZoneState>,
    /// Seconds left per kind that is still cooling down.
    pub cooldown_secs: BTreeMap<SignalKind, i64>,
    /// Oldest first.
    pub recent_alerts: Vec<Alert>,
}

/// Read-only handle to the latest snapshot. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHandle {
    inner: Arc<RwLock<EngineSnapshot>>,
}

impl SnapshotHandle {
    pub async fn get(&self) -> EngineSnapshot {
        self.inner.read().await.clone()
    }

    pub(crate) async fn publish(&self, snapshot: EngineSnapshot) {
        *self.inner.write().await = snapshot;
    }
}
