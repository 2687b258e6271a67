//! Entity catalog seam.
//!
//! The catalog of tracked entities lives outside this pipeline; it is
//! consumed read-only to resolve a job's target into concrete entities.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use pricewatch_core::{EntityId, TenantId};
use pricewatch_tracking::JobTarget;

use crate::stores::{StoreError, StoreResult};

/// A concrete entity the pipeline can fetch data for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub id: EntityId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Source-side locator (URL, SKU, feed key) the adapter understands.
    pub source_ref: String,
}

/// Read-only resolver from a job target to trackable entities.
pub trait EntityCatalog: Send + Sync {
    fn resolve(&self, tenant_id: TenantId, target: &JobTarget) -> StoreResult<Vec<TrackedEntity>>;
}

#[derive(Debug, Default)]
struct Inner {
    entities: HashMap<EntityId, TrackedEntity>,
    groups: HashMap<(TenantId, String), Vec<EntityId>>,
}

/// Catalog backed by registered entries, for tests/dev and static setups.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    inner: RwLock<Inner>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entity(&self, entity: TrackedEntity) {
        let mut inner = self.inner.write().unwrap();
        inner.entities.insert(entity.id, entity);
    }

    pub fn add_group(&self, tenant_id: TenantId, name: impl Into<String>, members: Vec<EntityId>) {
        let mut inner = self.inner.write().unwrap();
        inner.groups.insert((tenant_id, name.into()), members);
    }
}

impl EntityCatalog for StaticCatalog {
    fn resolve(&self, tenant_id: TenantId, target: &JobTarget) -> StoreResult<Vec<TrackedEntity>> {
        let inner = self.inner.read().unwrap();
        match target {
            JobTarget::Entity { entity_id } => {
                let entity = inner.entities.get(entity_id).ok_or(StoreError::NotFound)?;
                if entity.tenant_id != tenant_id {
                    return Err(StoreError::TenantIsolation);
                }
                Ok(vec![entity.clone()])
            }
            JobTarget::Group { name } => {
                let members = inner
                    .groups
                    .get(&(tenant_id, name.clone()))
                    .ok_or(StoreError::NotFound)?;
                Ok(members
                    .iter()
                    .filter_map(|id| inner.entities.get(id))
                    .cloned()
                    .collect())
            }
        }
    }
}
