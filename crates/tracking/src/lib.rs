//! `pricewatch-tracking` — domain model for the price-tracking pipeline.
//!
//! ## Design
//!
//! - Jobs are tenant-scoped recurring units of collection work
//! - Runs carry structured outcomes and form an immutable audit trail
//! - Snapshots are append-only observations keyed by (entity, observed_at)
//! - Alerts deduplicate per (entity, rule) within a suppression window
//! - Retention is policy-driven per tenant

pub mod alert;
pub mod backoff;
pub mod job;
pub mod retention;
pub mod rule;
pub mod run;
pub mod snapshot;
pub mod webhook;

pub use alert::{Alert, DeliveryState};
pub use backoff::BackoffPolicy;
pub use job::{Job, JobStatus, JobTarget, RunOutcome, SourceKind};
pub use retention::{ArchivalStrategy, RetentionPolicy};
pub use rule::{RuleId, RuleMatch, RulePolicy, Severity, ThresholdRules};
pub use run::{JobRun, RunError, RunErrorKind, RunStatus, RunTrigger};
pub use snapshot::Snapshot;
pub use webhook::{EventType, WebhookEvent, WebhookSubscription};
