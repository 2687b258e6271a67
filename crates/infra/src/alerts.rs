//! Rule evaluation over freshly written snapshots.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use pricewatch_core::AlertId;
use pricewatch_tracking::{Alert, RulePolicy, Snapshot};

use crate::stores::{AlertStore, SnapshotStore, StoreResult};

/// Default window within which a repeated `(entity, rule)` match is noise.
pub const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Suppression window for repeated matches of the same `(entity, rule)`.
    pub suppression_window: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            suppression_window: DEFAULT_SUPPRESSION_WINDOW,
        }
    }
}

/// Evaluates a snapshot against the rule policy and raises deduplicated
/// alerts.
pub struct AlertEvaluator {
    snapshots: Arc<dyn SnapshotStore>,
    alerts: Arc<dyn AlertStore>,
    rules: Arc<dyn RulePolicy>,
    config: EvaluatorConfig,
}

impl AlertEvaluator {
    pub fn new(
        snapshots: Arc<dyn SnapshotStore>,
        alerts: Arc<dyn AlertStore>,
        rules: Arc<dyn RulePolicy>,
        config: EvaluatorConfig,
    ) -> Self {
        Self {
            snapshots,
            alerts,
            rules,
            config,
        }
    }

    /// Compare the snapshot against the entity's previous one and raise an
    /// alert per matched rule. Returns the ids of alerts actually raised;
    /// suppressed duplicates are skipped silently.
    pub fn evaluate(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> StoreResult<Vec<AlertId>> {
        let previous = self
            .snapshots
            .latest_before(snapshot.entity_id, snapshot.observed_at)?;

        let mut raised = Vec::new();
        for matched in self.rules.evaluate(previous.as_ref(), snapshot) {
            let alert = Alert::new(
                snapshot.tenant_id,
                snapshot.entity_id,
                snapshot.id,
                matched.rule_id.clone(),
                matched.delta_pct,
                matched.severity,
                now,
            );
            if let Some(id) =
                self.alerts
                    .insert_if_no_recent(alert, self.config.suppression_window, now)?
            {
                info!(
                    alert_id = %id,
                    entity_id = %snapshot.entity_id,
                    rule_id = %matched.rule_id,
                    delta_pct = matched.delta_pct,
                    "alert raised"
                );
                raised.push(id);
            }
        }
        Ok(raised)
    }
}
