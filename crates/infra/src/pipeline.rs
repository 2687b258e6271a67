//! Pipeline assembly: wires stores, seams and loops together once, at
//! startup.

use std::sync::Arc;

use tracing::info;

use pricewatch_tracking::RulePolicy;

use crate::alerts::AlertEvaluator;
use crate::catalog::EntityCatalog;
use crate::config::PipelineConfig;
use crate::dispatch::{WebhookDispatcher, WebhookTransport};
use crate::executor::JobExecutor;
use crate::fetch::AdapterRegistry;
use crate::handle::LoopHandle;
use crate::retention::RetentionManager;
use crate::scheduler::Scheduler;
use crate::stores::{
    AlertStore, InMemoryAlertStore, InMemoryJobStore, InMemoryRetentionPolicyStore,
    InMemorySnapshotStore, InMemorySubscriptionStore, JobStore, RetentionPolicyStore,
    SnapshotStore, SubscriptionStore,
};

/// The five stores the pipeline runs against.
#[derive(Clone)]
pub struct PipelineStores {
    pub jobs: Arc<dyn JobStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub policies: Arc<dyn RetentionPolicyStore>,
}

impl PipelineStores {
    /// Fresh in-memory stores, for tests and single-process setups.
    pub fn in_memory() -> Self {
        Self {
            jobs: Arc::new(InMemoryJobStore::new()),
            snapshots: Arc::new(InMemorySnapshotStore::new()),
            alerts: Arc::new(InMemoryAlertStore::new()),
            subscriptions: Arc::new(InMemorySubscriptionStore::new()),
            policies: Arc::new(InMemoryRetentionPolicyStore::new()),
        }
    }
}

/// The assembled pipeline. Components are public so callers can drive
/// individual pieces (manual triggers, dead-letter replay) next to the
/// background loops.
pub struct Pipeline {
    pub scheduler: Arc<Scheduler>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub retention: Arc<RetentionManager>,
    pub stores: PipelineStores,
}

impl Pipeline {
    pub fn new(
        stores: PipelineStores,
        catalog: Arc<dyn EntityCatalog>,
        adapters: AdapterRegistry,
        rules: Arc<dyn RulePolicy>,
        transport: Arc<dyn WebhookTransport>,
        config: PipelineConfig,
    ) -> Self {
        let executor = Arc::new(JobExecutor::new(
            catalog,
            Arc::new(adapters),
            stores.snapshots.clone(),
            config.executor,
        ));
        let evaluator = Arc::new(AlertEvaluator::new(
            stores.snapshots.clone(),
            stores.alerts.clone(),
            rules,
            config.evaluator,
        ));
        let scheduler = Arc::new(Scheduler::new(
            stores.jobs.clone(),
            executor,
            evaluator,
            config.scheduler,
        ));
        let dispatcher = Arc::new(WebhookDispatcher::new(
            stores.alerts.clone(),
            stores.subscriptions.clone(),
            transport,
            config.dispatcher,
        ));
        let retention = Arc::new(RetentionManager::new(
            stores.policies.clone(),
            stores.snapshots.clone(),
            stores.alerts.clone(),
            stores.jobs.clone(),
            config.retention,
        ));

        Self {
            scheduler,
            dispatcher,
            retention,
            stores,
        }
    }

    /// Start the scheduler, dispatcher and retention loops.
    pub fn start(&self) -> PipelineHandle {
        info!("pipeline starting");
        PipelineHandle {
            scheduler: self.scheduler.spawn(),
            dispatcher: self.dispatcher.spawn(),
            retention: self.retention.spawn(),
        }
    }
}

/// Handles to the running loops.
pub struct PipelineHandle {
    scheduler: LoopHandle,
    dispatcher: LoopHandle,
    retention: LoopHandle,
}

impl PipelineHandle {
    /// Stop all loops, waiting for in-flight iterations.
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
        self.dispatcher.shutdown().await;
        self.retention.shutdown().await;
        info!("pipeline stopped");
    }
}
