//! `pricewatch-infra` — the collection pipeline.
//!
//! ## Design
//!
//! - Services are plain structs holding `Arc` store dependencies, wired once
//!   in [`pipeline::Pipeline`]; no module-level singletons
//! - Stores are traits with in-memory implementations for tests/dev
//! - The fetch adapter and webhook transport are seams: one implementation
//!   per external source, selected by the job's source kind
//! - Loop-level failures are recorded on records and logged, never thrown
//!   out of the loops
//!
//! ## Components
//!
//! - `scheduler`: ticking loop that dispatches due jobs with bounded
//!   concurrency and reaps stale runs
//! - `executor`: runs one job under its rate limit and run timeout
//! - `alerts`: evaluates new snapshots against the tenant's rules
//! - `dispatch`: signed webhook delivery with retry and dead-lettering
//! - `retention`: per-tenant sweep of old snapshots, alerts and run history

pub mod alerts;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod executor;
pub mod fetch;
pub mod handle;
pub mod pipeline;
pub mod retention;
pub mod scheduler;
pub mod signing;
pub mod stores;


pub use alerts::{AlertEvaluator, EvaluatorConfig};
pub use catalog::{EntityCatalog, StaticCatalog, TrackedEntity};
pub use config::PipelineConfig;
pub use dispatch::{
    DeliveryReport, DispatcherConfig, HttpWebhookTransport, TransportError, WebhookDispatcher,
    WebhookTransport,
};
pub use executor::{ExecutorConfig, JobExecutor, RunReport};
pub use fetch::{
    AdapterError, AdapterRegistry, EntityFailure, FetchAdapter, FetchError, FetchOutcome,
    Observation,
};
pub use handle::LoopHandle;
pub use pipeline::{Pipeline, PipelineHandle, PipelineStores};
pub use retention::{RetentionConfig, RetentionManager, SweepReport, TenantSweep};
pub use scheduler::{Scheduler, SchedulerConfig, TickReport};
pub use stores::{
    AlertStore, InMemoryAlertStore, InMemoryJobStore, InMemoryRetentionPolicyStore,
    InMemorySnapshotStore, InMemorySubscriptionStore, JobStats, JobStore, RetentionPolicyStore,
    SnapshotStore, StoreError, StoreResult, SubscriptionStore,
};
