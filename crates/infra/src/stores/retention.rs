//! Retention policy storage.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use pricewatch_core::TenantId;
use pricewatch_tracking::RetentionPolicy;

use super::{StoreError, StoreResult};

/// Retention policy store abstraction. One policy per tenant.
pub trait RetentionPolicyStore: Send + Sync {
    /// Create or replace the tenant's policy.
    fn upsert(&self, policy: RetentionPolicy) -> StoreResult<()>;

    fn get(&self, tenant_id: TenantId) -> StoreResult<RetentionPolicy>;

    fn all(&self) -> StoreResult<Vec<RetentionPolicy>>;

    /// Record when the tenant's sweep last ran.
    fn mark_sweep(&self, tenant_id: TenantId, at: DateTime<Utc>) -> StoreResult<()>;
}

/// In-memory policy store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRetentionPolicyStore {
    policies: RwLock<HashMap<TenantId, RetentionPolicy>>,
}

impl InMemoryRetentionPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RetentionPolicyStore for InMemoryRetentionPolicyStore {
    fn upsert(&self, policy: RetentionPolicy) -> StoreResult<()> {
        let mut policies = self.policies.write().unwrap();
        policies.insert(policy.tenant_id, policy);
        Ok(())
    }

    fn get(&self, tenant_id: TenantId) -> StoreResult<RetentionPolicy> {
        let policies = self.policies.read().unwrap();
        policies.get(&tenant_id).cloned().ok_or(StoreError::NotFound)
    }

    fn all(&self) -> StoreResult<Vec<RetentionPolicy>> {
        let policies = self.policies.read().unwrap();
        Ok(policies.values().cloned().collect())
    }

    fn mark_sweep(&self, tenant_id: TenantId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut policies = self.policies.write().unwrap();
        let policy = policies.get_mut(&tenant_id).ok_or(StoreError::NotFound)?;
        policy.last_archive_run_at = Some(at);
        Ok(())
    }
}
