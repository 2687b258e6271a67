//! Alert storage, including the atomic deduplication check.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

use pricewatch_core::{AlertId, TenantId};
use pricewatch_tracking::{Alert, DeliveryState};

use super::{StoreError, StoreResult};

/// Alert store abstraction.
pub trait AlertStore: Send + Sync {
    /// Insert the alert unless an alert for the same `(entity, rule)` pair
    /// is still undelivered or was detected within the suppression window.
    ///
    /// The check and the insert happen under one lock so concurrent
    /// evaluators cannot both insert. Returns `None` when suppressed.
    fn insert_if_no_recent(
        &self,
        alert: Alert,
        suppression_window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<AlertId>>;

    fn get(&self, alert_id: AlertId) -> StoreResult<Alert>;

    fn update(&self, alert: &Alert) -> StoreResult<()>;

    /// Alerts the dispatcher should pick up: `pending`, or `retrying` whose
    /// backoff has elapsed.
    fn due_for_delivery(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Alert>>;

    /// Parked deliveries, surfaced for manual inspection.
    fn dead_letters(&self, tenant_id: TenantId) -> StoreResult<Vec<Alert>>;

    /// Move a dead-lettered alert back to `pending` for replay.
    fn requeue_dead_letter(&self, alert_id: AlertId) -> StoreResult<Alert>;

    /// Remove alerts detected strictly before the cutoff.
    fn delete_older_than(&self, tenant_id: TenantId, cutoff: DateTime<Utc>) -> StoreResult<usize>;

    /// Move alerts detected strictly before the cutoff to cold storage.
    fn archive_older_than(&self, tenant_id: TenantId, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}

#[derive(Debug, Default)]
struct Inner {
    live: HashMap<AlertId, Alert>,
    cold: HashMap<AlertId, Alert>,
}

/// In-memory alert store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    inner: RwLock<Inner>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlertStore for InMemoryAlertStore {
    fn insert_if_no_recent(
        &self,
        alert: Alert,
        suppression_window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<AlertId>> {
        let mut inner = self.inner.write().unwrap();

        let window = chrono::Duration::from_std(suppression_window).unwrap_or_default();
        let suppressed = inner.live.values().any(|existing| {
            existing.entity_id == alert.entity_id
                && existing.rule_id == alert.rule_id
                && (!existing.delivery.is_terminal() || existing.detected_at + window > now)
        });
        if suppressed {
            return Ok(None);
        }

        let id = alert.id;
        inner.live.insert(id, alert);
        Ok(Some(id))
    }

    fn get(&self, alert_id: AlertId) -> StoreResult<Alert> {
        let inner = self.inner.read().unwrap();
        inner.live.get(&alert_id).cloned().ok_or(StoreError::NotFound)
    }

    fn update(&self, alert: &Alert) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        if !inner.live.contains_key(&alert.id) {
            return Err(StoreError::NotFound);
        }
        inner.live.insert(alert.id, alert.clone());
        Ok(())
    }

    fn due_for_delivery(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Alert>> {
        let inner = self.inner.read().unwrap();
        let mut due: Vec<_> = inner
            .live
            .values()
            .filter(|a| a.delivery.needs_delivery(now))
            .cloned()
            .collect();
        due.sort_by_key(|a| a.detected_at);
        due.truncate(limit);
        Ok(due)
    }

    fn dead_letters(&self, tenant_id: TenantId) -> StoreResult<Vec<Alert>> {
        let inner = self.inner.read().unwrap();
        let mut parked: Vec<_> = inner
            .live
            .values()
            .filter(|a| {
                a.tenant_id == tenant_id
                    && matches!(a.delivery, DeliveryState::DeadLettered { .. })
            })
            .cloned()
            .collect();
        parked.sort_by_key(|a| a.detected_at);
        Ok(parked)
    }

    fn requeue_dead_letter(&self, alert_id: AlertId) -> StoreResult<Alert> {
        let mut inner = self.inner.write().unwrap();
        let alert = inner.live.get_mut(&alert_id).ok_or(StoreError::NotFound)?;
        alert
            .requeue()
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        Ok(alert.clone())
    }

    fn delete_older_than(&self, tenant_id: TenantId, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut inner = self.inner.write().unwrap();
        let before = inner.live.len();
        inner
            .live
            .retain(|_, a| !(a.tenant_id == tenant_id && a.detected_at < cutoff));
        Ok(before - inner.live.len())
    }

    fn archive_older_than(&self, tenant_id: TenantId, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut inner = self.inner.write().unwrap();
        let doomed: Vec<_> = inner
            .live
            .values()
            .filter(|a| a.tenant_id == tenant_id && a.detected_at < cutoff)
            .map(|a| a.id)
            .collect();

        for id in &doomed {
            if let Some(alert) = inner.live.remove(id) {
                inner.cold.insert(*id, alert);
            }
        }
        Ok(doomed.len())
    }
}
