//! Retention sweep: applies each tenant's policy to old snapshots, alerts
//! and run history.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use pricewatch_core::TenantId;
use pricewatch_tracking::{ArchivalStrategy, RetentionPolicy};

use crate::handle::{LoopHandle, spawn_loop};
use crate::stores::{AlertStore, JobStore, RetentionPolicyStore, SnapshotStore, StoreResult};

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Rows affected for one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantSweep {
    pub tenant_id: TenantId,
    pub snapshots: usize,
    pub alerts: usize,
    pub job_runs: usize,
}

/// What one sweep did across all tenants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub tenants: Vec<TenantSweep>,
    /// Tenants whose sweep failed; retried on the next interval.
    pub skipped: usize,
}

/// Applies retention policies on a fixed interval.
pub struct RetentionManager {
    policies: Arc<dyn RetentionPolicyStore>,
    snapshots: Arc<dyn SnapshotStore>,
    alerts: Arc<dyn AlertStore>,
    jobs: Arc<dyn JobStore>,
    config: RetentionConfig,
}

impl RetentionManager {
    pub fn new(
        policies: Arc<dyn RetentionPolicyStore>,
        snapshots: Arc<dyn SnapshotStore>,
        alerts: Arc<dyn AlertStore>,
        jobs: Arc<dyn JobStore>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            policies,
            snapshots,
            alerts,
            jobs,
            config,
        }
    }

    /// One sweep over every tenant with a policy. A failing tenant is
    /// skipped and retried next time; it never aborts the others.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let policies = match self.policies.all() {
            Ok(policies) => policies,
            Err(e) => {
                warn!(error = %e, "retention policy listing failed, skipping sweep");
                return SweepReport::default();
            }
        };

        let mut report = SweepReport::default();
        for policy in policies {
            match self.sweep_tenant(&policy, now) {
                Ok(swept) => {
                    info!(
                        tenant_id = %swept.tenant_id,
                        snapshots = swept.snapshots,
                        alerts = swept.alerts,
                        job_runs = swept.job_runs,
                        strategy = ?policy.strategy,
                        "retention sweep finished"
                    );
                    report.tenants.push(swept);
                }
                Err(e) => {
                    warn!(tenant_id = %policy.tenant_id, error = %e, "tenant sweep failed");
                    report.skipped += 1;
                }
            }
        }
        report
    }

    /// Spawn the sweeping loop.
    pub fn spawn(self: &Arc<Self>) -> LoopHandle {
        let manager = Arc::clone(self);
        spawn_loop("retention", self.config.sweep_interval, move || {
            let manager = manager.clone();
            async move {
                manager.sweep(Utc::now());
            }
        })
    }

    fn sweep_tenant(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> StoreResult<TenantSweep> {
        let tenant_id = policy.tenant_id;

        let snapshots = match policy.strategy {
            ArchivalStrategy::Delete => self
                .snapshots
                .delete_older_than(tenant_id, policy.snapshot_cutoff(now))?,
            ArchivalStrategy::Archive => self
                .snapshots
                .archive_older_than(tenant_id, policy.snapshot_cutoff(now))?,
        };
        let alerts = match policy.strategy {
            ArchivalStrategy::Delete => self
                .alerts
                .delete_older_than(tenant_id, policy.alert_cutoff(now))?,
            ArchivalStrategy::Archive => self
                .alerts
                .archive_older_than(tenant_id, policy.alert_cutoff(now))?,
        };
        // Run history is audit trail: always archived, regardless of the
        // strategy.
        let job_runs = self
            .jobs
            .archive_runs_older_than(tenant_id, policy.job_run_cutoff(now))?;

        self.policies.mark_sweep(tenant_id, now)?;
        Ok(TenantSweep {
            tenant_id,
            snapshots,
            alerts,
            job_runs,
        })
    }
}
