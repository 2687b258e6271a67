//! Scheduling loop: dispatches due jobs with bounded concurrency and reaps
//! runs lost by a dead executor.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use pricewatch_core::{JobId, JobRunId};
use pricewatch_tracking::{Job, JobRun, RunError, RunOutcome, RunTrigger};

use crate::alerts::AlertEvaluator;
use crate::executor::JobExecutor;
use crate::handle::{LoopHandle, spawn_loop};
use crate::stores::{JobStore, StoreError, StoreResult};

/// Default scheduler tick.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Default bound on concurrently executing runs.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// Upper bound on runs executing at once across all jobs.
    pub max_concurrent: usize,
    /// How many due jobs one tick picks up.
    pub dispatch_batch: usize,
    /// A `running` run older than this is considered lost and gets reaped.
    pub staleness: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            dispatch_batch: 10,
            staleness: Duration::from_secs(30 * 60),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Lost runs failed by the watchdog.
    pub reaped: usize,
    /// Runs started and driven to a terminal state.
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Due jobs skipped, usually because a run was already in flight.
    pub skipped: usize,
}

/// The scheduling loop.
pub struct Scheduler {
    jobs: Arc<dyn JobStore>,
    executor: Arc<JobExecutor>,
    evaluator: Arc<AlertEvaluator>,
    limiter: Arc<Semaphore>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        executor: Arc<JobExecutor>,
        evaluator: Arc<AlertEvaluator>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            jobs,
            executor,
            evaluator,
            limiter: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
        }
    }

    /// One scheduling pass: reap lost runs, then dispatch due jobs.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport {
            reaped: self.reap_stale(now),
            ..TickReport::default()
        };

        let due = match self.jobs.due_jobs(now, self.config.dispatch_batch) {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "due-job query failed, skipping tick");
                return report;
            }
        };

        let outcomes = join_all(due.into_iter().map(|job| self.dispatch(job))).await;
        for outcome in outcomes {
            match outcome {
                Some(RunOutcome::Succeeded) => {
                    report.dispatched += 1;
                    report.succeeded += 1;
                }
                Some(RunOutcome::Failed) => {
                    report.dispatched += 1;
                    report.failed += 1;
                }
                None => report.skipped += 1,
            }
        }
        report
    }

    /// Force a run outside the schedule. The single-run-per-job slot still
    /// applies; a second manual trigger while a run is in flight conflicts.
    pub async fn trigger_now(&self, job_id: JobId) -> StoreResult<JobRunId> {
        let job = self.jobs.get(job_id)?;
        let (run_id, _) = self.run_job(&job, RunTrigger::Manual).await?;
        Ok(run_id)
    }

    /// Spawn the ticking loop.
    pub fn spawn(self: &Arc<Self>) -> LoopHandle {
        let scheduler = Arc::clone(self);
        spawn_loop("scheduler", self.config.tick_interval, move || {
            let scheduler = scheduler.clone();
            async move {
                scheduler.tick(Utc::now()).await;
            }
        })
    }

    async fn dispatch(&self, job: Job) -> Option<RunOutcome> {
        // The semaphore is never closed, so acquire only fails on close.
        let _permit = self.limiter.acquire().await.ok()?;

        match self.run_job(&job, RunTrigger::Scheduled).await {
            Ok((_, outcome)) => Some(outcome),
            Err(StoreError::Conflict(reason)) => {
                debug!(job_id = %job.id, reason, "dispatch skipped");
                None
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "dispatch failed");
                None
            }
        }
    }

    async fn run_job(
        &self,
        job: &Job,
        trigger: RunTrigger,
    ) -> StoreResult<(JobRunId, RunOutcome)> {
        let started_at = Utc::now();
        let mut run = JobRun::new(job.id, job.tenant_id, trigger, started_at);
        self.jobs
            .begin_run(run.clone(), self.config.staleness, started_at)?;
        info!(job_id = %job.id, run_id = %run.id, trigger = ?trigger, "run started");

        let report = self.executor.execute(job, &run).await;
        let finished_at = Utc::now();

        let transition = match &report.error {
            None => run.complete(finished_at, report.snapshots_written),
            Some(error) => run.fail(finished_at, error.clone()),
        };
        if let Err(e) = transition {
            warn!(run_id = %run.id, error = %e, "run transition rejected");
        }
        self.jobs.finish_run(&run)?;

        // Re-read the job: an operator may have paused or retuned it while
        // the run was executing.
        let mut stored = self.jobs.get(job.id)?;
        match &report.error {
            None => stored.record_outcome(finished_at, RunOutcome::Succeeded),
            Some(error) if error.is_transient() => {
                stored.record_outcome(finished_at, RunOutcome::Failed);
            }
            Some(_) => stored.record_terminal_failure(finished_at),
        }
        self.jobs.update(&stored)?;

        for snapshot in &report.snapshots {
            if let Err(e) = self.evaluator.evaluate(snapshot, finished_at) {
                warn!(
                    run_id = %run.id,
                    snapshot_id = %snapshot.id,
                    error = %e,
                    "rule evaluation failed"
                );
            }
        }

        info!(
            job_id = %job.id,
            run_id = %run.id,
            outcome = ?report.outcome(),
            snapshots = report.snapshots_written,
            failed_entities = report.failed_entities,
            "run finished"
        );
        Ok((run.id, report.outcome()))
    }

    fn reap_stale(&self, now: DateTime<Utc>) -> usize {
        let stale = match self.jobs.stale_runs(self.config.staleness, now) {
            Ok(stale) => stale,
            Err(e) => {
                warn!(error = %e, "stale-run query failed");
                return 0;
            }
        };

        let mut reaped = 0;
        for mut run in stale {
            warn!(
                run_id = %run.id,
                job_id = %run.job_id,
                started_at = %run.started_at,
                "reaping stale run"
            );
            if run.fail(now, RunError::timeout(self.config.staleness)).is_err() {
                continue;
            }
            if let Err(e) = self.jobs.finish_run(&run) {
                warn!(run_id = %run.id, error = %e, "failed to fail stale run");
                continue;
            }
            match self.jobs.get(run.job_id) {
                Ok(mut job) => {
                    job.record_outcome(now, RunOutcome::Failed);
                    if let Err(e) = self.jobs.update(&job) {
                        warn!(job_id = %job.id, error = %e, "failed to reschedule reaped job");
                    }
                }
                Err(e) => warn!(job_id = %run.job_id, error = %e, "reaped run has no job"),
            }
            reaped += 1;
        }
        reaped
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use pricewatch_core::{EntityId, TenantId};
    use pricewatch_tracking::{
        JobStatus, JobTarget, RunErrorKind, RunStatus, SourceKind, ThresholdRules,
    };

    use super::*;
    use crate::alerts::EvaluatorConfig;
    use crate::catalog::{StaticCatalog, TrackedEntity};
    use crate::executor::ExecutorConfig;
    use crate::fetch::{AdapterRegistry, FetchAdapter, FetchError, FetchOutcome, Observation};
    use crate::stores::{
        AlertStore, InMemoryAlertStore, InMemoryJobStore, InMemorySnapshotStore, SnapshotStore,
    };

    /// Adapter returning a scripted sequence of prices, one per call.
    #[derive(Debug)]
    struct ScriptedAdapter {
        prices: Mutex<Vec<u64>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl ScriptedAdapter {
        fn new(prices: Vec<u64>) -> Self {
            Self {
                prices: Mutex::new(prices),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl FetchAdapter for ScriptedAdapter {
        async fn fetch(
            &self,
            _job: &Job,
            entities: &[TrackedEntity],
        ) -> Result<FetchOutcome, FetchError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(500)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let price = self
                .prices
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| FetchError::Transient("script exhausted".to_string()))?;
            Ok(FetchOutcome::of(
                entities
                    .iter()
                    .map(|e| Observation {
                        entity_id: e.id,
                        price_minor: price,
                        currency: "EUR".to_string(),
                        in_stock: true,
                        observed_at: Utc::now(),
                        metadata: serde_json::Value::Null,
                    })
                    .collect(),
            ))
        }
    }

    struct Fixture {
        jobs: Arc<InMemoryJobStore>,
        snapshots: Arc<InMemorySnapshotStore>,
        alerts: Arc<InMemoryAlertStore>,
        scheduler: Arc<Scheduler>,
        tenant: TenantId,
        entity: EntityId,
    }

    fn fixture(adapter: Arc<dyn FetchAdapter>, config: SchedulerConfig) -> Fixture {
        let tenant = TenantId::new();
        let entity_id = EntityId::new();

        let catalog = Arc::new(StaticCatalog::new());
        catalog.add_entity(TrackedEntity {
            id: entity_id,
            tenant_id: tenant,
            name: "widget".to_string(),
            source_ref: "https://shop.test/widget".to_string(),
        });

        let mut registry = AdapterRegistry::new();
        registry.register(SourceKind::Scrape, adapter).unwrap();

        let jobs = Arc::new(InMemoryJobStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let alerts = Arc::new(InMemoryAlertStore::new());

        let executor = Arc::new(JobExecutor::new(
            catalog,
            Arc::new(registry),
            snapshots.clone(),
            ExecutorConfig::default(),
        ));
        let evaluator = Arc::new(AlertEvaluator::new(
            snapshots.clone(),
            alerts.clone(),
            Arc::new(ThresholdRules::default()),
            EvaluatorConfig::default(),
        ));
        let scheduler = Arc::new(Scheduler::new(jobs.clone(), executor, evaluator, config));

        Fixture {
            jobs,
            snapshots,
            alerts,
            scheduler,
            tenant,
            entity: entity_id,
        }
    }

    fn entity_job(fx: &Fixture) -> Job {
        Job::new(
            fx.tenant,
            JobTarget::entity(fx.entity),
            SourceKind::Scrape,
            60,
            1,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn tick_runs_due_jobs_and_reschedules() {
        let fx = fixture(
            Arc::new(ScriptedAdapter::new(vec![1000])),
            SchedulerConfig::default(),
        );
        let job = entity_job(&fx);
        fx.jobs.insert(job.clone()).unwrap();

        let report = fx.scheduler.tick(Utc::now()).await;
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.succeeded, 1);

        let stored = fx.jobs.get(job.id).unwrap();
        assert_eq!(stored.last_status, Some(RunOutcome::Succeeded));
        assert!(stored.next_run_at.is_some());
        assert!(!stored.is_due(Utc::now()));

        let runs = fx.jobs.runs_for_job(job.id).unwrap();
        assert_eq!(runs.len(), 1);
        assert!(matches!(
            runs[0].status,
            RunStatus::Completed {
                snapshots_written: 1
            }
        ));
        assert_eq!(
            fx.snapshots
                .list_for_entity(fx.tenant, fx.entity, 10)
                .unwrap()
                .len(),
            1
        );

        // The job is rescheduled, so an immediate second tick is a no-op.
        let again = fx.scheduler.tick(Utc::now()).await;
        assert_eq!(again.dispatched, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_run_blocks_a_second_dispatch() {
        let fx = fixture(
            Arc::new(ScriptedAdapter::new(vec![1000])),
            SchedulerConfig::default(),
        );
        let job = entity_job(&fx);
        fx.jobs.insert(job.clone()).unwrap();

        let now = Utc::now();
        let in_flight = JobRun::new(job.id, job.tenant_id, RunTrigger::Manual, now);
        fx.jobs
            .begin_run(in_flight, Duration::from_secs(30 * 60), now)
            .unwrap();

        let report = fx.scheduler.tick(now).await;
        assert_eq!(report.dispatched, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(fx.jobs.runs_for_job(job.id).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_stays_within_the_bound() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![1000; 5]));
        let fx = fixture(
            adapter.clone(),
            SchedulerConfig {
                max_concurrent: 2,
                ..SchedulerConfig::default()
            },
        );
        for _ in 0..5 {
            fx.jobs.insert(entity_job(&fx)).unwrap();
        }

        let report = fx.scheduler.tick(Utc::now()).await;
        assert_eq!(report.dispatched, 5);
        assert!(adapter.max_active.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_run_is_reaped_and_job_rescheduled() {
        let fx = fixture(
            Arc::new(ScriptedAdapter::new(vec![])),
            SchedulerConfig::default(),
        );
        let mut job = entity_job(&fx);
        job.next_run_at = Some(Utc::now() + chrono::Duration::hours(1));
        fx.jobs.insert(job.clone()).unwrap();

        let mut lost = JobRun::new(job.id, job.tenant_id, RunTrigger::Scheduled, Utc::now());
        lost.started_at = Utc::now() - chrono::Duration::hours(2);
        fx.jobs
            .begin_run(lost.clone(), Duration::from_secs(86400), Utc::now())
            .unwrap();

        let report = fx.scheduler.tick(Utc::now()).await;
        assert_eq!(report.reaped, 1);

        let reaped = fx.jobs.get_run(lost.id).unwrap();
        match reaped.status {
            RunStatus::Failed { error } => assert_eq!(error.kind, RunErrorKind::Timeout),
            other => panic!("unexpected status: {other:?}"),
        }
        assert_eq!(
            fx.jobs.get(job.id).unwrap().last_status,
            Some(RunOutcome::Failed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_uses_the_retry_interval() {
        // Empty script: every fetch is a transient failure.
        let fx = fixture(
            Arc::new(ScriptedAdapter::new(vec![])),
            SchedulerConfig::default(),
        );
        let job = entity_job(&fx);
        fx.jobs.insert(job.clone()).unwrap();

        let report = fx.scheduler.tick(Utc::now()).await;
        assert_eq!(report.failed, 1);

        let stored = fx.jobs.get(job.id).unwrap();
        assert_eq!(stored.last_status, Some(RunOutcome::Failed));
        let next = stored.next_run_at.unwrap();
        let expected = stored.last_run_at.unwrap()
            + chrono::Duration::from_std(stored.retry_interval).unwrap();
        assert_eq!(next, expected);
    }

    #[derive(Debug)]
    struct TerminalAdapter;

    #[async_trait]
    impl FetchAdapter for TerminalAdapter {
        async fn fetch(
            &self,
            _job: &Job,
            _entities: &[TrackedEntity],
        ) -> Result<FetchOutcome, FetchError> {
            Err(FetchError::Terminal("selector config is invalid".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_backs_off_to_the_healthy_interval() {
        let fx = fixture(Arc::new(TerminalAdapter), SchedulerConfig::default());
        let job = entity_job(&fx);
        fx.jobs.insert(job.clone()).unwrap();

        fx.scheduler.tick(Utc::now()).await;

        let stored = fx.jobs.get(job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Active);
        assert_eq!(stored.last_status, Some(RunOutcome::Failed));
        let next = stored.next_run_at.unwrap();
        let expected = stored.last_run_at.unwrap()
            + chrono::Duration::from_std(stored.healthy_interval).unwrap();
        assert_eq!(next, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_trigger_runs_a_job_that_is_not_due() {
        let fx = fixture(
            Arc::new(ScriptedAdapter::new(vec![1000])),
            SchedulerConfig::default(),
        );
        let mut job = entity_job(&fx);
        job.next_run_at = Some(Utc::now() + chrono::Duration::hours(1));
        fx.jobs.insert(job.clone()).unwrap();

        let run_id = fx.scheduler.trigger_now(job.id).await.unwrap();
        let run = fx.jobs.get_run(run_id).unwrap();
        assert_eq!(run.trigger, RunTrigger::Manual);
        assert!(run.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn price_drop_across_runs_raises_an_alert() {
        // Scripted prices pop from the back: 1000 first, then 800.
        let fx = fixture(
            Arc::new(ScriptedAdapter::new(vec![800, 1000])),
            SchedulerConfig::default(),
        );
        let job = entity_job(&fx).with_intervals(
            Duration::from_secs(3600),
            Duration::from_secs(900),
        );
        fx.jobs.insert(job.clone()).unwrap();

        fx.scheduler.tick(Utc::now()).await;
        assert!(
            fx.alerts
                .due_for_delivery(Utc::now(), 10)
                .unwrap()
                .is_empty()
        );

        // Force the second observation without waiting out the interval.
        fx.scheduler.trigger_now(job.id).await.unwrap();

        let due = fx.alerts.due_for_delivery(Utc::now(), 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].rule_id.as_str(), ThresholdRules::PRICE_DROP);
        assert_eq!(due[0].delta_pct, -20.0);
    }
}
