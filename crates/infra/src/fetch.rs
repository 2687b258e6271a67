//! Fetch adapter seam and routing.
//!
//! One adapter implementation per external source kind; the job's `source`
//! field selects which one runs. The adapter owns its own robustness
//! concerns; the executor only sees observations and classified errors.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pricewatch_core::EntityId;
use pricewatch_tracking::{Job, SourceKind};

use crate::catalog::TrackedEntity;

/// One raw observation returned by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub entity_id: EntityId,
    pub price_minor: u64,
    pub currency: String,
    pub in_stock: bool,
    pub observed_at: DateTime<Utc>,
    /// Source metadata kept verbatim (page URL, matched selector, ...).
    pub metadata: serde_json::Value,
}

/// Per-entity failure inside an otherwise usable result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFailure {
    pub entity_id: EntityId,
    pub message: String,
}

/// Adapter result: observations plus per-entity failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub observations: Vec<Observation>,
    pub failures: Vec<EntityFailure>,
}

impl FetchOutcome {
    pub fn of(observations: Vec<Observation>) -> Self {
        Self {
            observations,
            failures: Vec::new(),
        }
    }
}

/// Total-failure error from an adapter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Worth retrying soon: source timeout, rate limiting, flaky network.
    #[error("transient source failure: {0}")]
    Transient(String),
    /// Retrying will not help: broken source configuration.
    #[error("source configuration invalid: {0}")]
    Terminal(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Strategy interface for pulling data from one kind of external source.
#[async_trait]
pub trait FetchAdapter: Send + Sync + std::fmt::Debug {
    async fn fetch(
        &self,
        job: &Job,
        entities: &[TrackedEntity],
    ) -> Result<FetchOutcome, FetchError>;
}

/// Adapter routing error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("no adapter registered for source {0}")]
    NotRegistered(SourceKind),
    #[error("duplicate adapter for source {0}")]
    Duplicate(SourceKind),
}

/// Registry of adapters (source kind -> adapter).
///
/// Built during initialization (mutable), used during runtime (immutable);
/// this keeps it lock-free.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<SourceKind, Arc<dyn FetchAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        source: SourceKind,
        adapter: Arc<dyn FetchAdapter>,
    ) -> Result<(), AdapterError> {
        if self.adapters.contains_key(&source) {
            return Err(AdapterError::Duplicate(source));
        }
        self.adapters.insert(source, adapter);
        Ok(())
    }

    pub fn get(&self, source: &SourceKind) -> Result<&Arc<dyn FetchAdapter>, AdapterError> {
        self.adapters
            .get(source)
            .ok_or_else(|| AdapterError::NotRegistered(source.clone()))
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NullAdapter;

    #[async_trait]
    impl FetchAdapter for NullAdapter {
        async fn fetch(
            &self,
            _job: &Job,
            _entities: &[TrackedEntity],
        ) -> Result<FetchOutcome, FetchError> {
            Ok(FetchOutcome::default())
        }
    }

    #[test]
    fn registry_routes_by_source_kind() {
        let mut registry = AdapterRegistry::new();
        registry
            .register(SourceKind::Scrape, Arc::new(NullAdapter))
            .unwrap();

        assert!(registry.get(&SourceKind::Scrape).is_ok());
        assert!(matches!(
            registry.get(&SourceKind::Feed).unwrap_err(),
            AdapterError::NotRegistered(_)
        ));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = AdapterRegistry::new();
        registry
            .register(SourceKind::Scrape, Arc::new(NullAdapter))
            .unwrap();

        assert!(matches!(
            registry.register(SourceKind::Scrape, Arc::new(NullAdapter)),
            Err(AdapterError::Duplicate(_))
        ));
    }
}
