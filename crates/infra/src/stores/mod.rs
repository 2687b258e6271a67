//! Store traits and their in-memory implementations.
//!
//! The pipeline only ever talks to these traits; a relational backend slots
//! in behind them without touching the services.

pub mod alert;
pub mod job;
pub mod retention;
pub mod snapshot;
pub mod webhook;

pub use alert::{AlertStore, InMemoryAlertStore};
pub use job::{InMemoryJobStore, JobStats, JobStore};
pub use retention::{InMemoryRetentionPolicyStore, RetentionPolicyStore};
pub use snapshot::{InMemorySnapshotStore, SnapshotStore};
pub use webhook::{InMemorySubscriptionStore, SubscriptionStore};

/// Store-level error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("tenant isolation violation")]
    TenantIsolation,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("terminal record is immutable")]
    Immutable,
    #[error("storage error: {0}")]
    Storage(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
