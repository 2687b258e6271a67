//! Per-tenant data retention policies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pricewatch_core::TenantId;

/// What happens to rows past their retention window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchivalStrategy {
    /// Remove outright.
    Delete,
    /// Move to cold storage and mark archived.
    Archive,
}

/// Retention windows for one tenant. Upserted on configuration change.
///
/// Job-run history is always archived (audit trail), never deleted; the
/// strategy applies to snapshots and alerts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub tenant_id: TenantId,
    pub snapshot_days: u32,
    pub alert_days: u32,
    pub job_run_days: u32,
    pub strategy: ArchivalStrategy,
    pub last_archive_run_at: Option<DateTime<Utc>>,
}

impl RetentionPolicy {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            snapshot_days: 30,
            alert_days: 90,
            job_run_days: 180,
            strategy: ArchivalStrategy::Delete,
            last_archive_run_at: None,
        }
    }

    pub fn with_windows(mut self, snapshot_days: u32, alert_days: u32, job_run_days: u32) -> Self {
        self.snapshot_days = snapshot_days;
        self.alert_days = alert_days;
        self.job_run_days = job_run_days;
        self
    }

    pub fn with_strategy(mut self, strategy: ArchivalStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn snapshot_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::days(i64::from(self.snapshot_days))
    }

    pub fn alert_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::days(i64::from(self.alert_days))
    }

    pub fn job_run_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::days(i64::from(self.job_run_days))
    }
}
