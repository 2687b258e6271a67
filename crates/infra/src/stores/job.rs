//! Job and job-run storage.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

use pricewatch_core::{JobId, JobRunId, TenantId};
use pricewatch_tracking::{Job, JobRun, JobStatus, RunStatus};

use super::{StoreError, StoreResult};

/// Operator-facing counts.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct JobStats {
    pub active: usize,
    pub paused: usize,
    pub archived: usize,
    pub running_runs: usize,
}

/// Job store abstraction.
pub trait JobStore: Send + Sync {
    /// Register a new job.
    fn insert(&self, job: Job) -> StoreResult<JobId>;

    fn get(&self, job_id: JobId) -> StoreResult<Job>;

    fn update(&self, job: &Job) -> StoreResult<()>;

    /// Jobs eligible for dispatch: active, with `next_run_at` unset or past.
    ///
    /// Ordered by priority ascending, then `next_run_at` ascending with
    /// unset treated as earliest.
    fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Job>>;

    /// Atomically claim the run slot for a job.
    ///
    /// Checks for an existing non-stale `running` run and inserts the new
    /// `running` run under one lock, closing the double-dispatch race.
    /// Fails with [`StoreError::Conflict`] when the slot is taken or the job
    /// is not active.
    fn begin_run(
        &self,
        run: JobRun,
        staleness: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Persist a terminal run state. Terminal runs are immutable.
    fn finish_run(&self, run: &JobRun) -> StoreResult<()>;

    fn get_run(&self, run_id: JobRunId) -> StoreResult<JobRun>;

    fn runs_for_job(&self, job_id: JobId) -> StoreResult<Vec<JobRun>>;

    /// Runs still `running` past the staleness threshold (lost executors).
    fn stale_runs(&self, staleness: Duration, now: DateTime<Utc>) -> StoreResult<Vec<JobRun>>;

    /// Mark terminal runs older than the cutoff as archived. Returns the
    /// number of runs affected. History is never deleted.
    fn archive_runs_older_than(
        &self,
        tenant_id: TenantId,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<usize>;

    fn stats(&self, tenant_id: TenantId) -> StoreResult<JobStats>;
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    runs: HashMap<JobRunId, JobRun>,
}

/// In-memory job store for tests/dev.
///
/// One lock over jobs and runs so `begin_run` is atomic.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: Job) -> StoreResult<JobId> {
        let mut inner = self.inner.write().unwrap();
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(format!("job already exists: {}", job.id)));
        }
        let id = job.id;
        inner.jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> StoreResult<Job> {
        let inner = self.inner.read().unwrap();
        inner.jobs.get(&job_id).cloned().ok_or(StoreError::NotFound)
    }

    fn update(&self, job: &Job) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        if !inner.jobs.contains_key(&job.id) {
            return Err(StoreError::NotFound);
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Job>> {
        let inner = self.inner.read().unwrap();
        let mut due: Vec<_> = inner
            .jobs
            .values()
            .filter(|j| j.is_due(now))
            .cloned()
            .collect();

        // Unset next_run_at sorts earliest: a job that never ran goes first
        // within its priority band.
        due.sort_by_key(|j| (j.priority, j.next_run_at, j.created_at));
        due.truncate(limit);
        Ok(due)
    }

    fn begin_run(
        &self,
        run: JobRun,
        staleness: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();

        let job = inner.jobs.get(&run.job_id).ok_or(StoreError::NotFound)?;
        if job.status != JobStatus::Active {
            return Err(StoreError::Conflict(format!(
                "job {} is not active",
                run.job_id
            )));
        }

        let in_flight = inner.runs.values().any(|r| {
            r.job_id == run.job_id
                && matches!(r.status, RunStatus::Running)
                && !r.is_stale(now, staleness)
        });
        if in_flight {
            return Err(StoreError::Conflict(format!(
                "job {} already has a running run",
                run.job_id
            )));
        }

        inner.runs.insert(run.id, run);
        Ok(())
    }

    fn finish_run(&self, run: &JobRun) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        let stored = inner.runs.get(&run.id).ok_or(StoreError::NotFound)?;
        if stored.is_terminal() {
            return Err(StoreError::Immutable);
        }
        inner.runs.insert(run.id, run.clone());
        Ok(())
    }

    fn get_run(&self, run_id: JobRunId) -> StoreResult<JobRun> {
        let inner = self.inner.read().unwrap();
        inner.runs.get(&run_id).cloned().ok_or(StoreError::NotFound)
    }

    fn runs_for_job(&self, job_id: JobId) -> StoreResult<Vec<JobRun>> {
        let inner = self.inner.read().unwrap();
        let mut runs: Vec<_> = inner
            .runs
            .values()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }

    fn stale_runs(&self, staleness: Duration, now: DateTime<Utc>) -> StoreResult<Vec<JobRun>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .runs
            .values()
            .filter(|r| r.is_stale(now, staleness))
            .cloned()
            .collect())
    }

    fn archive_runs_older_than(
        &self,
        tenant_id: TenantId,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut inner = self.inner.write().unwrap();
        let mut affected = 0;
        for run in inner.runs.values_mut() {
            if run.tenant_id == tenant_id
                && run.is_terminal()
                && !run.archived
                && run.started_at < cutoff
            {
                run.archived = true;
                affected += 1;
            }
        }
        Ok(affected)
    }

    fn stats(&self, tenant_id: TenantId) -> StoreResult<JobStats> {
        let inner = self.inner.read().unwrap();
        let mut stats = JobStats::default();

        for job in inner.jobs.values() {
            if job.tenant_id != tenant_id {
                continue;
            }
            match job.status {
                JobStatus::Active => stats.active += 1,
                JobStatus::Paused => stats.paused += 1,
                JobStatus::Archived => stats.archived += 1,
            }
        }
        stats.running_runs = inner
            .runs
            .values()
            .filter(|r| r.tenant_id == tenant_id && matches!(r.status, RunStatus::Running))
            .count();

        Ok(stats)
    }
}
