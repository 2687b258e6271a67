//! Snapshot storage.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use pricewatch_core::{EntityId, SnapshotId, TenantId};
use pricewatch_tracking::Snapshot;

use super::StoreResult;

/// Snapshot store abstraction.
pub trait SnapshotStore: Send + Sync {
    /// Write a batch of snapshots, deduplicating on `(entity_id,
    /// observed_at)`. Re-running the same write is a no-op for rows already
    /// present. Returns the number of rows newly inserted.
    fn upsert_batch(&self, snapshots: Vec<Snapshot>) -> StoreResult<usize>;

    fn get(&self, snapshot_id: SnapshotId) -> StoreResult<Option<Snapshot>>;

    /// Most recent snapshot for the entity observed strictly before
    /// `before`. This is the baseline the alert rules compare against.
    fn latest_before(
        &self,
        entity_id: EntityId,
        before: DateTime<Utc>,
    ) -> StoreResult<Option<Snapshot>>;

    fn list_for_entity(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        limit: usize,
    ) -> StoreResult<Vec<Snapshot>>;

    /// Remove snapshots observed strictly before the cutoff. Returns the
    /// number of rows removed.
    fn delete_older_than(&self, tenant_id: TenantId, cutoff: DateTime<Utc>) -> StoreResult<usize>;

    /// Move snapshots observed strictly before the cutoff to cold storage.
    /// Returns the number of rows moved.
    fn archive_older_than(&self, tenant_id: TenantId, cutoff: DateTime<Utc>) -> StoreResult<usize>;

    /// Rows currently in cold storage for the tenant.
    fn archived_count(&self, tenant_id: TenantId) -> StoreResult<usize>;
}

#[derive(Debug, Default)]
struct Inner {
    live: HashMap<SnapshotId, Snapshot>,
    by_key: HashMap<(EntityId, DateTime<Utc>), SnapshotId>,
    cold: HashMap<SnapshotId, Snapshot>,
}

/// In-memory snapshot store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    inner: RwLock<Inner>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn upsert_batch(&self, snapshots: Vec<Snapshot>) -> StoreResult<usize> {
        let mut inner = self.inner.write().unwrap();
        let mut inserted = 0;
        for snapshot in snapshots {
            let key = snapshot.logical_key();
            if inner.by_key.contains_key(&key) {
                continue;
            }
            inner.by_key.insert(key, snapshot.id);
            inner.live.insert(snapshot.id, snapshot);
            inserted += 1;
        }
        Ok(inserted)
    }

    fn get(&self, snapshot_id: SnapshotId) -> StoreResult<Option<Snapshot>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.live.get(&snapshot_id).cloned())
    }

    fn latest_before(
        &self,
        entity_id: EntityId,
        before: DateTime<Utc>,
    ) -> StoreResult<Option<Snapshot>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .live
            .values()
            .filter(|s| s.entity_id == entity_id && s.observed_at < before)
            .max_by_key(|s| s.observed_at)
            .cloned())
    }

    fn list_for_entity(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        limit: usize,
    ) -> StoreResult<Vec<Snapshot>> {
        let inner = self.inner.read().unwrap();
        let mut rows: Vec<_> = inner
            .live
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.entity_id == entity_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| std::cmp::Reverse(s.observed_at));
        rows.truncate(limit);
        Ok(rows)
    }

    fn delete_older_than(&self, tenant_id: TenantId, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut inner = self.inner.write().unwrap();
        let doomed: Vec<_> = inner
            .live
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.observed_at < cutoff)
            .map(|s| (s.id, s.logical_key()))
            .collect();

        for (id, key) in &doomed {
            inner.live.remove(id);
            inner.by_key.remove(key);
        }
        Ok(doomed.len())
    }

    fn archive_older_than(&self, tenant_id: TenantId, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut inner = self.inner.write().unwrap();
        let doomed: Vec<_> = inner
            .live
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.observed_at < cutoff)
            .map(|s| (s.id, s.logical_key()))
            .collect();

        for (id, key) in &doomed {
            if let Some(snapshot) = inner.live.remove(id) {
                inner.cold.insert(*id, snapshot);
            }
            inner.by_key.remove(key);
        }
        Ok(doomed.len())
    }

    fn archived_count(&self, tenant_id: TenantId) -> StoreResult<usize> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .cold
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .count())
    }
}
