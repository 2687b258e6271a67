//! Job execution: one run of one job, under its rate limit and time budget.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use pricewatch_core::SnapshotId;
use pricewatch_tracking::{Job, JobRun, RunError, RunOutcome, Snapshot};

use crate::catalog::EntityCatalog;
use crate::fetch::{AdapterRegistry, FetchError, Observation};
use crate::stores::SnapshotStore;

/// Default overall time budget for one run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Overall time budget for one run, covering all fetch calls and writes.
    pub run_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            run_timeout: DEFAULT_RUN_TIMEOUT,
        }
    }
}

/// What one run produced.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub snapshots_written: u32,
    pub failed_entities: u32,
    /// Set when the run failed as a whole. Partial failures with at least
    /// one snapshot written leave this unset.
    pub error: Option<RunError>,
    /// The snapshots this run produced, in write order, for rule evaluation.
    pub snapshots: Vec<Snapshot>,
}

impl RunReport {
    pub fn outcome(&self) -> RunOutcome {
        if self.error.is_none() {
            RunOutcome::Succeeded
        } else {
            RunOutcome::Failed
        }
    }

    fn failed(error: RunError) -> Self {
        Self {
            failed_entities: error.failed_entities,
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Executes a single job run: resolve the target, fetch entity by entity
/// under the job's rate limit, and persist snapshots incrementally.
pub struct JobExecutor {
    catalog: Arc<dyn EntityCatalog>,
    adapters: Arc<AdapterRegistry>,
    snapshots: Arc<dyn SnapshotStore>,
    config: ExecutorConfig,
}

impl JobExecutor {
    pub fn new(
        catalog: Arc<dyn EntityCatalog>,
        adapters: Arc<AdapterRegistry>,
        snapshots: Arc<dyn SnapshotStore>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            catalog,
            adapters,
            snapshots,
            config,
        }
    }

    /// Run the job under the overall time budget.
    ///
    /// Never panics or returns early errors; everything surfaces as a
    /// structured [`RunReport`].
    pub async fn execute(&self, job: &Job, run: &JobRun) -> RunReport {
        match tokio::time::timeout(self.config.run_timeout, self.run_inner(job, run)).await {
            Ok(report) => report,
            Err(_) => {
                warn!(
                    job_id = %job.id,
                    run_id = %run.id,
                    budget_secs = self.config.run_timeout.as_secs(),
                    "run exceeded its time budget"
                );
                // Snapshots written before the deadline are already persisted
                // and stay; the dedup key makes the retry safe.
                RunReport::failed(RunError::timeout(self.config.run_timeout))
            }
        }
    }

    async fn run_inner(&self, job: &Job, run: &JobRun) -> RunReport {
        let entities = match self.catalog.resolve(job.tenant_id, &job.target) {
            Ok(entities) => entities,
            Err(e) => {
                return RunReport::failed(RunError::terminal(
                    format!("target resolution failed: {e}"),
                    0,
                ));
            }
        };
        let adapter = match self.adapters.get(&job.source) {
            Ok(adapter) => adapter,
            Err(e) => return RunReport::failed(RunError::terminal(e.to_string(), 0)),
        };

        let delay = job.inter_call_delay();
        let mut report = RunReport::default();
        let mut terminal = false;
        let mut last_error = String::new();

        for (i, entity) in entities.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(delay).await;
            }

            match adapter.fetch(job, std::slice::from_ref(entity)).await {
                Ok(outcome) => {
                    for failure in &outcome.failures {
                        debug!(
                            job_id = %job.id,
                            entity_id = %failure.entity_id,
                            error = %failure.message,
                            "entity fetch failed"
                        );
                        last_error = failure.message.clone();
                    }
                    report.failed_entities += outcome.failures.len() as u32;

                    let batch: Vec<Snapshot> = outcome
                        .observations
                        .iter()
                        .map(|obs| self.snapshot_from(job, run, obs))
                        .collect();
                    report.snapshots_written += batch.len() as u32;
                    report.snapshots.extend(batch.clone());

                    // Written per entity so a mid-run timeout keeps what it
                    // collected.
                    if let Err(e) = self.snapshots.upsert_batch(batch) {
                        warn!(job_id = %job.id, error = %e, "snapshot write failed");
                        return RunReport::failed(RunError::transient(
                            format!("snapshot write failed: {e}"),
                            report.failed_entities,
                        ));
                    }
                }
                Err(FetchError::Transient(message)) => {
                    debug!(
                        job_id = %job.id,
                        entity_id = %entity.id,
                        error = %message,
                        "transient fetch failure, continuing with next entity"
                    );
                    report.failed_entities += 1;
                    last_error = message;
                }
                Err(FetchError::Terminal(message)) => {
                    // Broken source configuration; the remaining entities
                    // would fail the same way.
                    warn!(job_id = %job.id, error = %message, "terminal fetch failure");
                    report.failed_entities += 1;
                    last_error = message;
                    terminal = true;
                    break;
                }
            }
        }

        if report.snapshots_written == 0 && report.failed_entities > 0 {
            report.error = Some(if terminal {
                RunError::terminal(last_error, report.failed_entities)
            } else {
                RunError::no_data(
                    format!("no entity yielded data; last error: {last_error}"),
                    report.failed_entities,
                )
            });
        }
        report
    }

    fn snapshot_from(&self, job: &Job, run: &JobRun, obs: &Observation) -> Snapshot {
        Snapshot {
            id: SnapshotId::new(),
            tenant_id: job.tenant_id,
            entity_id: obs.entity_id,
            run_id: run.id,
            price_minor: obs.price_minor,
            currency: obs.currency.clone(),
            in_stock: obs.in_stock,
            observed_at: obs.observed_at,
            recorded_at: Utc::now(),
            metadata: obs.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use pricewatch_core::TenantId;
    use pricewatch_tracking::{JobTarget, RunErrorKind, RunTrigger, SourceKind};

    use super::*;
    use crate::catalog::{StaticCatalog, TrackedEntity};
    use crate::fetch::{EntityFailure, FetchAdapter, FetchOutcome};
    use crate::stores::InMemorySnapshotStore;

    #[derive(Debug)]
    struct FixedPriceAdapter {
        prices: Vec<(pricewatch_core::EntityId, u64)>,
        observed_at: DateTime<Utc>,
        /// Entities that should fail per-entity instead of observing.
        failing: Vec<pricewatch_core::EntityId>,
        // tokio Instants so the paused-clock tests see the virtual time.
        calls: Mutex<Vec<tokio::time::Instant>>,
    }

    #[async_trait]
    impl FetchAdapter for FixedPriceAdapter {
        async fn fetch(
            &self,
            _job: &Job,
            entities: &[TrackedEntity],
        ) -> Result<FetchOutcome, FetchError> {
            self.calls.lock().unwrap().push(tokio::time::Instant::now());
            let mut outcome = FetchOutcome::default();
            for entity in entities {
                if self.failing.contains(&entity.id) {
                    outcome.failures.push(EntityFailure {
                        entity_id: entity.id,
                        message: "selector matched nothing".to_string(),
                    });
                    continue;
                }
                let price = self
                    .prices
                    .iter()
                    .find(|(id, _)| *id == entity.id)
                    .map(|(_, p)| *p)
                    .unwrap_or(1000);
                outcome.observations.push(Observation {
                    entity_id: entity.id,
                    price_minor: price,
                    currency: "EUR".to_string(),
                    in_stock: true,
                    observed_at: self.observed_at,
                    metadata: serde_json::Value::Null,
                });
            }
            Ok(outcome)
        }
    }

    #[derive(Debug)]
    struct FailingAdapter(FetchError);

    #[async_trait]
    impl FetchAdapter for FailingAdapter {
        async fn fetch(
            &self,
            _job: &Job,
            _entities: &[TrackedEntity],
        ) -> Result<FetchOutcome, FetchError> {
            Err(self.0.clone())
        }
    }

    fn fixture(tenant: TenantId, count: usize) -> (Arc<StaticCatalog>, Vec<TrackedEntity>) {
        let catalog = Arc::new(StaticCatalog::new());
        let mut entities = Vec::new();
        for i in 0..count {
            let entity = TrackedEntity {
                id: pricewatch_core::EntityId::new(),
                tenant_id: tenant,
                name: format!("widget-{i}"),
                source_ref: format!("https://shop.test/widget-{i}"),
            };
            catalog.add_entity(entity.clone());
            entities.push(entity);
        }
        catalog.add_group(tenant, "widgets", entities.iter().map(|e| e.id).collect());
        (catalog, entities)
    }

    fn executor_with(
        catalog: Arc<StaticCatalog>,
        adapter: Arc<dyn FetchAdapter>,
        snapshots: Arc<InMemorySnapshotStore>,
    ) -> JobExecutor {
        let mut registry = AdapterRegistry::new();
        registry.register(SourceKind::Scrape, adapter).unwrap();
        JobExecutor::new(catalog, Arc::new(registry), snapshots, ExecutorConfig::default())
    }

    fn scrape_job(tenant: TenantId, rate: u32) -> (Job, JobRun) {
        let job = Job::new(tenant, JobTarget::group("widgets"), SourceKind::Scrape, rate, 1);
        let run = JobRun::new(job.id, tenant, RunTrigger::Scheduled, Utc::now());
        (job, run)
    }

    #[tokio::test(start_paused = true)]
    async fn all_observations_are_persisted() {
        let tenant = TenantId::new();
        let (catalog, entities) = fixture(tenant, 3);
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let adapter = Arc::new(FixedPriceAdapter {
            prices: entities.iter().map(|e| (e.id, 1500)).collect(),
            observed_at: Utc::now(),
            failing: vec![],
            calls: Mutex::new(vec![]),
        });
        let executor = executor_with(catalog, adapter, snapshots.clone());

        let (job, run) = scrape_job(tenant, 60);
        let report = executor.execute(&job, &run).await;

        assert_eq!(report.snapshots_written, 3);
        assert_eq!(report.outcome(), RunOutcome::Succeeded);
        assert!(report.error.is_none());
        for entity in &entities {
            assert_eq!(
                snapshots.list_for_entity(tenant, entity.id, 10).unwrap().len(),
                1
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_spaces_fetch_calls() {
        let tenant = TenantId::new();
        let (catalog, entities) = fixture(tenant, 3);
        let adapter = Arc::new(FixedPriceAdapter {
            prices: entities.iter().map(|e| (e.id, 1500)).collect(),
            observed_at: Utc::now(),
            failing: vec![],
            calls: Mutex::new(vec![]),
        });
        let executor = executor_with(
            catalog,
            adapter.clone(),
            Arc::new(InMemorySnapshotStore::new()),
        );

        // 30/min means 2s between calls.
        let (job, run) = scrape_job(tenant, 30);
        executor.execute(&job, &run).await;

        let calls = adapter.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn partial_failure_keeps_the_successes() {
        let tenant = TenantId::new();
        let (catalog, entities) = fixture(tenant, 3);
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let adapter = Arc::new(FixedPriceAdapter {
            prices: entities.iter().map(|e| (e.id, 1500)).collect(),
            observed_at: Utc::now(),
            failing: vec![entities[1].id],
            calls: Mutex::new(vec![]),
        });
        let executor = executor_with(catalog, adapter, snapshots);

        let (job, run) = scrape_job(tenant, 60);
        let report = executor.execute(&job, &run).await;

        assert_eq!(report.snapshots_written, 2);
        assert_eq!(report.failed_entities, 1);
        // Partial success is still a success.
        assert!(report.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn all_entities_failing_is_a_no_data_failure() {
        let tenant = TenantId::new();
        let (catalog, entities) = fixture(tenant, 2);
        let adapter = Arc::new(FixedPriceAdapter {
            prices: vec![],
            observed_at: Utc::now(),
            failing: entities.iter().map(|e| e.id).collect(),
            calls: Mutex::new(vec![]),
        });
        let executor = executor_with(catalog, adapter, Arc::new(InMemorySnapshotStore::new()));

        let (job, run) = scrape_job(tenant, 60);
        let report = executor.execute(&job, &run).await;

        let error = report.error.unwrap();
        assert_eq!(error.kind, RunErrorKind::NoData);
        assert_eq!(error.failed_entities, 2);
        assert!(error.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_adapter_error_aborts_the_run() {
        let tenant = TenantId::new();
        let (catalog, _) = fixture(tenant, 3);
        let adapter = Arc::new(FailingAdapter(FetchError::Terminal(
            "selector config is invalid".to_string(),
        )));
        let executor = executor_with(catalog, adapter, Arc::new(InMemorySnapshotStore::new()));

        let (job, run) = scrape_job(tenant, 60);
        let report = executor.execute(&job, &run).await;

        let error = report.error.unwrap();
        assert_eq!(error.kind, RunErrorKind::AdapterTerminal);
        // Aborted after the first entity; the other two were never attempted.
        assert_eq!(error.failed_entities, 1);
        assert!(!error.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn unresolvable_target_is_terminal() {
        let tenant = TenantId::new();
        let catalog = Arc::new(StaticCatalog::new());
        let adapter = Arc::new(FailingAdapter(FetchError::Transient("unused".to_string())));
        let executor = executor_with(catalog, adapter, Arc::new(InMemorySnapshotStore::new()));

        let (job, run) = scrape_job(tenant, 60);
        let report = executor.execute(&job, &run).await;

        assert_eq!(report.error.unwrap().kind, RunErrorKind::AdapterTerminal);
    }

    #[derive(Debug)]
    struct SlowAdapter;

    #[async_trait]
    impl FetchAdapter for SlowAdapter {
        async fn fetch(
            &self,
            _job: &Job,
            entities: &[TrackedEntity],
        ) -> Result<FetchOutcome, FetchError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            let _ = entities;
            Ok(FetchOutcome::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_timeout_fails_the_run() {
        let tenant = TenantId::new();
        let (catalog, _) = fixture(tenant, 1);
        let mut registry = AdapterRegistry::new();
        registry
            .register(SourceKind::Scrape, Arc::new(SlowAdapter))
            .unwrap();
        let executor = JobExecutor::new(
            catalog,
            Arc::new(registry),
            Arc::new(InMemorySnapshotStore::new()),
            ExecutorConfig {
                run_timeout: Duration::from_secs(5),
            },
        );

        let (job, run) = scrape_job(tenant, 60);
        let report = executor.execute(&job, &run).await;

        assert_eq!(report.error.unwrap().kind, RunErrorKind::Timeout);
    }
}
