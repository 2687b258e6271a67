//! Snapshots: immutable, timestamped observations of a tracked entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pricewatch_core::{EntityId, JobRunId, SnapshotId, TenantId};

/// One observed value for a tracked entity.
///
/// Append-only; never mutated after creation. Logical uniqueness is
/// `(entity_id, observed_at)` so a retried run cannot duplicate rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub tenant_id: TenantId,
    pub entity_id: EntityId,
    /// Which run produced this observation (provenance).
    pub run_id: JobRunId,
    /// Observed price in the smallest currency unit.
    pub price_minor: u64,
    pub currency: String,
    pub in_stock: bool,
    /// When the source reported the value.
    pub observed_at: DateTime<Utc>,
    /// When we persisted it.
    pub recorded_at: DateTime<Utc>,
    /// Raw source metadata, kept verbatim for debugging extractions.
    pub metadata: serde_json::Value,
}

impl Snapshot {
    /// Key under which retried writes deduplicate.
    pub fn logical_key(&self) -> (EntityId, DateTime<Utc>) {
        (self.entity_id, self.observed_at)
    }

    /// Percentage change of this snapshot's price relative to `previous`.
    ///
    /// Returns `None` when the previous price is zero (no meaningful delta).
    pub fn price_delta_pct(&self, previous: &Snapshot) -> Option<f64> {
        if previous.price_minor == 0 {
            return None;
        }
        let prev = previous.price_minor as f64;
        let curr = self.price_minor as f64;
        Some((curr - prev) / prev * 100.0)
    }
}
