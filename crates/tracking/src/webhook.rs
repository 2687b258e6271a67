//! Webhook subscriptions and the outbound event payload contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pricewatch_core::{EventId, SubscriptionId, TenantId};

use crate::alert::Alert;

/// Event types a subscriber can opt into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "alert.raised")]
    AlertRaised,
    #[serde(rename = "job.failed")]
    JobFailed,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::AlertRaised => f.write_str("alert.raised"),
            EventType::JobFailed => f.write_str("job.failed"),
        }
    }
}

/// A subscriber endpoint. Long-lived, managed out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: SubscriptionId,
    pub tenant_id: TenantId,
    pub endpoint: String,
    pub event_types: Vec<EventType>,
    /// Per-subscription signing secret; the signature covers the raw body.
    pub secret: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl WebhookSubscription {
    pub fn new(
        tenant_id: TenantId,
        endpoint: impl Into<String>,
        event_types: Vec<EventType>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            tenant_id,
            endpoint: endpoint.into(),
            event_types,
            secret: secret.into(),
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn accepts(&self, tenant_id: TenantId, event_type: EventType) -> bool {
        self.active && self.tenant_id == tenant_id && self.event_types.contains(&event_type)
    }
}

/// The payload delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Stable across retries; subscribers de-duplicate on it.
    pub event_id: EventId,
    pub event_type: EventType,
    pub tenant_id: TenantId,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl WebhookEvent {
    /// Build the `alert.raised` event for an alert.
    pub fn for_alert(alert: &Alert) -> Self {
        Self {
            event_id: alert.event_id(),
            event_type: EventType::AlertRaised,
            tenant_id: alert.tenant_id,
            occurred_at: alert.detected_at,
            payload: serde_json::json!({
                "alert_id": alert.id,
                "entity_id": alert.entity_id,
                "snapshot_id": alert.snapshot_id,
                "rule_id": alert.rule_id,
                "delta_pct": alert.delta_pct,
                "severity": alert.severity,
            }),
        }
    }
}
