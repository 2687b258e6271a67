//! Alert rules.
//!
//! The rule set is a pluggable policy: the evaluator only sees `RulePolicy`.
//! `ThresholdRules` is the minimal default (price drop / price rise / went
//! out of stock).

use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;

/// Stable rule identifier, used for alert deduplication and in payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A rule that matched a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub rule_id: RuleId,
    /// Price movement in percent; zero for non-price rules.
    pub delta_pct: f64,
    pub severity: Severity,
}

/// Evaluates a new snapshot against the previous one for the same entity.
pub trait RulePolicy: Send + Sync {
    fn evaluate(&self, previous: Option<&Snapshot>, current: &Snapshot) -> Vec<RuleMatch>;
}

/// Default threshold rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdRules {
    /// Raise when the price dropped by more than this percentage.
    pub drop_pct: f64,
    /// Raise when the price rose by more than this percentage.
    pub rise_pct: f64,
}

impl Default for ThresholdRules {
    fn default() -> Self {
        Self {
            drop_pct: 10.0,
            rise_pct: 20.0,
        }
    }
}

impl ThresholdRules {
    pub const PRICE_DROP: &'static str = "price_drop";
    pub const PRICE_RISE: &'static str = "price_rise";
    pub const OUT_OF_STOCK: &'static str = "out_of_stock";
}

impl RulePolicy for ThresholdRules {
    fn evaluate(&self, previous: Option<&Snapshot>, current: &Snapshot) -> Vec<RuleMatch> {
        // Without a baseline there is nothing to compare against.
        let Some(previous) = previous else {
            return Vec::new();
        };

        let mut matches = Vec::new();

        if let Some(delta) = current.price_delta_pct(previous) {
            if delta <= -self.drop_pct {
                // A drop twice past the threshold is worth waking someone up.
                let severity = if delta <= -2.0 * self.drop_pct {
                    Severity::Critical
                } else {
                    Severity::Warning
                };
                matches.push(RuleMatch {
                    rule_id: RuleId::new(Self::PRICE_DROP),
                    delta_pct: delta,
                    severity,
                });
            } else if delta >= self.rise_pct {
                matches.push(RuleMatch {
                    rule_id: RuleId::new(Self::PRICE_RISE),
                    delta_pct: delta,
                    severity: Severity::Warning,
                });
            }
        }

        if previous.in_stock && !current.in_stock {
            matches.push(RuleMatch {
                rule_id: RuleId::new(Self::OUT_OF_STOCK),
                delta_pct: 0.0,
                severity: Severity::Warning,
            });
        }

        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pricewatch_core::{EntityId, JobRunId, SnapshotId, TenantId};

    fn snapshot(price_minor: u64, in_stock: bool) -> Snapshot {
        Snapshot {
            id: SnapshotId::new(),
            tenant_id: TenantId::new(),
            entity_id: EntityId::new(),
            run_id: JobRunId::new(),
            price_minor,
            currency: "EUR".to_string(),
            in_stock,
            observed_at: Utc::now(),
            recorded_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn no_baseline_no_matches() {
        let rules = ThresholdRules::default();
        assert!(rules.evaluate(None, &snapshot(1000, true)).is_empty());
    }

    #[test]
    fn price_drop_past_threshold_matches() {
        let rules = ThresholdRules::default();
        let prev = snapshot(1000, true);

        let matches = rules.evaluate(Some(&prev), &snapshot(880, true));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].rule_id.as_str(), ThresholdRules::PRICE_DROP);
        assert_eq!(matches[0].delta_pct, -12.0);
        assert_eq!(matches[0].severity, Severity::Warning);

        // Small movements stay quiet.
        assert!(rules.evaluate(Some(&prev), &snapshot(950, true)).is_empty());
    }

    #[test]
    fn deep_drop_escalates_to_critical() {
        let rules = ThresholdRules::default();
        let prev = snapshot(1000, true);

        let matches = rules.evaluate(Some(&prev), &snapshot(700, true));
        assert_eq!(matches[0].severity, Severity::Critical);
    }

    #[test]
    fn price_rise_past_threshold_matches() {
        let rules = ThresholdRules::default();
        let prev = snapshot(1000, true);

        let matches = rules.evaluate(Some(&prev), &snapshot(1250, true));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].rule_id.as_str(), ThresholdRules::PRICE_RISE);
        assert_eq!(matches[0].delta_pct, 25.0);
    }

    #[test]
    fn stockout_transition_matches() {
        let rules = ThresholdRules::default();
        let prev = snapshot(1000, true);

        let matches = rules.evaluate(Some(&prev), &snapshot(1000, false));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].rule_id.as_str(), ThresholdRules::OUT_OF_STOCK);

        // Still out of stock is not a new transition.
        let prev_out = snapshot(1000, false);
        assert!(rules.evaluate(Some(&prev_out), &snapshot(1000, false)).is_empty());
    }

    #[test]
    fn zero_baseline_price_is_ignored() {
        let rules = ThresholdRules::default();
        let prev = snapshot(0, true);
        assert!(rules.evaluate(Some(&prev), &snapshot(500, true)).is_empty());
    }
}
