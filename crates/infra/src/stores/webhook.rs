//! Webhook subscription storage.

use std::collections::HashMap;
use std::sync::RwLock;

use pricewatch_core::{SubscriptionId, TenantId};
use pricewatch_tracking::{EventType, WebhookSubscription};

use super::{StoreError, StoreResult};

/// Subscription store abstraction.
pub trait SubscriptionStore: Send + Sync {
    /// Create or replace a subscription.
    fn upsert(&self, subscription: WebhookSubscription) -> StoreResult<SubscriptionId>;

    fn get(&self, subscription_id: SubscriptionId) -> StoreResult<WebhookSubscription>;

    /// Active subscriptions for the tenant that opted into the event type.
    fn matching(
        &self,
        tenant_id: TenantId,
        event_type: EventType,
    ) -> StoreResult<Vec<WebhookSubscription>>;
}

/// In-memory subscription store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: RwLock<HashMap<SubscriptionId, WebhookSubscription>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubscriptionStore for InMemorySubscriptionStore {
    fn upsert(&self, subscription: WebhookSubscription) -> StoreResult<SubscriptionId> {
        let mut subs = self.subscriptions.write().unwrap();
        let id = subscription.id;
        subs.insert(id, subscription);
        Ok(id)
    }

    fn get(&self, subscription_id: SubscriptionId) -> StoreResult<WebhookSubscription> {
        let subs = self.subscriptions.read().unwrap();
        subs.get(&subscription_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn matching(
        &self,
        tenant_id: TenantId,
        event_type: EventType,
    ) -> StoreResult<Vec<WebhookSubscription>> {
        let subs = self.subscriptions.read().unwrap();
        let mut matched: Vec<_> = subs
            .values()
            .filter(|s| s.accepts(tenant_id, event_type))
            .cloned()
            .collect();
        matched.sort_by_key(|s| s.created_at);
        Ok(matched)
    }
}
