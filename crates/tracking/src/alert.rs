//! Alerts raised when a snapshot matches a configured rule, and their
//! delivery state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pricewatch_core::{AlertId, DomainError, DomainResult, EntityId, EventId, SnapshotId, TenantId};

use crate::rule::{RuleId, Severity};

/// Delivery lifecycle of an alert.
///
/// `pending → delivering → delivered` on success;
/// `pending → delivering → retrying → delivering → …` with backoff on
/// failure; `dead_lettered` after the retry budget is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Delivering,
    Retrying {
        /// Failed attempts so far.
        attempt: u32,
        next_attempt_at: DateTime<Utc>,
    },
    Delivered {
        at: DateTime<Utc>,
    },
    /// Parked for manual inspection; never retried automatically.
    DeadLettered {
        attempts: u32,
        reason: String,
    },
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryState::Delivered { .. } | DeliveryState::DeadLettered { .. }
        )
    }

    /// Whether the dispatcher should pick this alert up now.
    pub fn needs_delivery(&self, now: DateTime<Utc>) -> bool {
        match self {
            DeliveryState::Pending => true,
            DeliveryState::Retrying {
                next_attempt_at, ..
            } => *next_attempt_at <= now,
            _ => false,
        }
    }
}

/// A raised notification that a snapshot matched a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub tenant_id: TenantId,
    pub entity_id: EntityId,
    /// The snapshot that triggered the rule.
    pub snapshot_id: SnapshotId,
    pub rule_id: RuleId,
    pub delta_pct: f64,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
    pub delivery: DeliveryState,
}

impl Alert {
    pub fn new(
        tenant_id: TenantId,
        entity_id: EntityId,
        snapshot_id: SnapshotId,
        rule_id: RuleId,
        delta_pct: f64,
        severity: Severity,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AlertId::new(),
            tenant_id,
            entity_id,
            snapshot_id,
            rule_id,
            delta_pct,
            severity,
            detected_at,
            delivery: DeliveryState::Pending,
        }
    }

    /// Outbound event id for this alert.
    ///
    /// Derived from the alert id so it is identical on every delivery
    /// attempt; subscribers de-duplicate on it.
    pub fn event_id(&self) -> EventId {
        EventId::from_uuid(*self.id.as_uuid())
    }

    pub fn mark_delivering(&mut self) -> DomainResult<()> {
        match &self.delivery {
            DeliveryState::Pending | DeliveryState::Retrying { .. } => {
                self.delivery = DeliveryState::Delivering;
                Ok(())
            }
            other => Err(DomainError::invariant(format!(
                "cannot start delivery from state {other:?}"
            ))),
        }
    }

    pub fn mark_delivered(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.delivery.is_terminal() {
            return Err(DomainError::invariant("delivery already finished"));
        }
        self.delivery = DeliveryState::Delivered { at: now };
        Ok(())
    }

    pub fn mark_retrying(&mut self, attempt: u32, next_attempt_at: DateTime<Utc>) -> DomainResult<()> {
        if self.delivery.is_terminal() {
            return Err(DomainError::invariant("delivery already finished"));
        }
        self.delivery = DeliveryState::Retrying {
            attempt,
            next_attempt_at,
        };
        Ok(())
    }

    pub fn mark_dead_lettered(&mut self, attempts: u32, reason: impl Into<String>) -> DomainResult<()> {
        if self.delivery.is_terminal() {
            return Err(DomainError::invariant("delivery already finished"));
        }
        self.delivery = DeliveryState::DeadLettered {
            attempts,
            reason: reason.into(),
        };
        Ok(())
    }

    /// Move a dead-lettered alert back to `pending` for manual replay.
    pub fn requeue(&mut self) -> DomainResult<()> {
        match &self.delivery {
            DeliveryState::DeadLettered { .. } => {
                self.delivery = DeliveryState::Pending;
                Ok(())
            }
            other => Err(DomainError::invariant(format!(
                "only dead-lettered alerts can be requeued, got {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::ThresholdRules;

    fn test_alert() -> Alert {
        Alert::new(
            TenantId::new(),
            EntityId::new(),
            SnapshotId::new(),
            RuleId::new(ThresholdRules::PRICE_DROP),
            -12.5,
            Severity::Warning,
            Utc::now(),
        )
    }

    #[test]
    fn event_id_is_stable_across_retries() {
        let mut alert = test_alert();
        let first = alert.event_id();

        alert.mark_delivering().unwrap();
        alert.mark_retrying(1, Utc::now()).unwrap();
        alert.mark_delivering().unwrap();

        assert_eq!(alert.event_id(), first);
    }

    #[test]
    fn happy_path_transitions() {
        let mut alert = test_alert();
        assert!(alert.delivery.needs_delivery(Utc::now()));

        alert.mark_delivering().unwrap();
        assert!(!alert.delivery.needs_delivery(Utc::now()));

        alert.mark_delivered(Utc::now()).unwrap();
        assert!(alert.delivery.is_terminal());
        assert!(alert.mark_delivering().is_err());
    }

    #[test]
    fn retrying_becomes_due_when_backoff_elapses() {
        let mut alert = test_alert();
        alert.mark_delivering().unwrap();

        let later = Utc::now() + chrono::Duration::seconds(30);
        alert.mark_retrying(1, later).unwrap();

        assert!(!alert.delivery.needs_delivery(Utc::now()));
        assert!(alert.delivery.needs_delivery(later));
    }

    #[test]
    fn dead_lettered_is_parked_until_requeued() {
        let mut alert = test_alert();
        alert.mark_delivering().unwrap();
        alert.mark_dead_lettered(5, "connection refused").unwrap();

        assert!(alert.delivery.is_terminal());
        assert!(!alert.delivery.needs_delivery(Utc::now()));
        assert!(alert.mark_delivering().is_err());
        assert!(alert.mark_retrying(6, Utc::now()).is_err());

        alert.requeue().unwrap();
        assert_eq!(alert.delivery, DeliveryState::Pending);
    }

    #[test]
    fn only_dead_letters_can_be_requeued() {
        let mut alert = test_alert();
        assert!(alert.requeue().is_err());
    }
}
