//! Recurring collection jobs and their scheduling state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pricewatch_core::{DomainError, DomainResult, EntityId, JobId, TenantId};

/// Interval applied after a successful run.
pub const DEFAULT_HEALTHY_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Interval applied after a failed run (short retry, not steady-state polling).
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Floor for the delay between consecutive fetch calls, so a pathological
/// rate limit cannot busy-loop the executor.
pub const MIN_CALL_DELAY: Duration = Duration::from_millis(50);

/// External source kind. Routes the job to a fetch adapter implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Scrape a competitor storefront.
    Scrape,
    /// Pull from a structured partner feed.
    Feed,
    /// Custom source routed by name.
    Custom { name: String },
}

impl SourceKind {
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom { name: name.into() }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Scrape => write!(f, "scrape"),
            SourceKind::Feed => write!(f, "feed"),
            SourceKind::Custom { name } => write!(f, "custom:{name}"),
        }
    }
}

/// What a job tracks: one entity, or a named group resolved by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTarget {
    Entity { entity_id: EntityId },
    Group { name: String },
}

impl JobTarget {
    pub fn entity(entity_id: EntityId) -> Self {
        Self::Entity { entity_id }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::Group { name: name.into() }
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Eligible for scheduling.
    Active,
    /// Kept, but never dispatched.
    Paused,
    /// Retired. Jobs are archived, never hard-deleted.
    Archived,
}

/// Outcome of the most recent run, kept on the job for operator visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed,
}

/// A recurring collection job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Tenant scope
    pub tenant_id: TenantId,
    /// What this job tracks
    pub target: JobTarget,
    /// Which adapter fetches for this job
    pub source: SourceKind,
    /// Max outbound calls per minute against the external source
    pub rate_limit_per_min: u32,
    /// Lower runs first
    pub priority: i32,
    /// Lifecycle status
    pub status: JobStatus,
    /// Interval to the next run after success
    pub healthy_interval: Duration,
    /// Interval to the next run after failure
    pub retry_interval: Duration,
    /// When the job last started a run
    pub last_run_at: Option<DateTime<Utc>>,
    /// When the job becomes due. `None` means due immediately.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Outcome of the most recent run
    pub last_status: Option<RunOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new active job, due immediately.
    pub fn new(
        tenant_id: TenantId,
        target: JobTarget,
        source: SourceKind,
        rate_limit_per_min: u32,
        priority: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            tenant_id,
            target,
            source,
            rate_limit_per_min,
            priority,
            status: JobStatus::Active,
            healthy_interval: DEFAULT_HEALTHY_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            last_run_at: None,
            next_run_at: None,
            last_status: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Override the per-job scheduling intervals.
    pub fn with_intervals(mut self, healthy: Duration, retry: Duration) -> Self {
        self.healthy_interval = healthy;
        self.retry_interval = retry;
        self
    }

    /// Whether the scheduler should consider this job on the current tick.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Active && self.next_run_at.is_none_or(|at| at <= now)
    }

    /// Delay between consecutive fetch calls within one run.
    ///
    /// `60000ms / rate_limit_per_min`, floored so a zero/huge rate limit
    /// cannot produce a busy loop.
    pub fn inter_call_delay(&self) -> Duration {
        let per_min = u64::from(self.rate_limit_per_min.max(1));
        let delay = Duration::from_millis(60_000 / per_min);
        delay.max(MIN_CALL_DELAY)
    }

    /// Record a finished run and schedule the next one.
    ///
    /// Success reschedules at the healthy interval, failure at the (shorter)
    /// retry interval.
    pub fn record_outcome(&mut self, now: DateTime<Utc>, outcome: RunOutcome) {
        let interval = match outcome {
            RunOutcome::Succeeded => self.healthy_interval,
            RunOutcome::Failed => self.retry_interval,
        };
        self.last_run_at = Some(now);
        self.last_status = Some(outcome);
        self.next_run_at = Some(now + chrono::Duration::from_std(interval).unwrap_or_default());
        self.updated_at = now;
    }

    /// Record a terminal failure (broken source configuration).
    ///
    /// The job stays active and visibly failed, but reschedules at the
    /// healthy interval: hammering a misconfigured source on the short
    /// retry interval would only produce a failure storm.
    pub fn record_terminal_failure(&mut self, now: DateTime<Utc>) {
        self.last_run_at = Some(now);
        self.last_status = Some(RunOutcome::Failed);
        self.next_run_at =
            Some(now + chrono::Duration::from_std(self.healthy_interval).unwrap_or_default());
        self.updated_at = now;
    }

    pub fn pause(&mut self) -> DomainResult<()> {
        match self.status {
            JobStatus::Active => {
                self.status = JobStatus::Paused;
                self.updated_at = Utc::now();
                Ok(())
            }
            JobStatus::Paused => Ok(()),
            JobStatus::Archived => Err(DomainError::invariant("cannot pause an archived job")),
        }
    }

    pub fn resume(&mut self) -> DomainResult<()> {
        match self.status {
            JobStatus::Paused => {
                self.status = JobStatus::Active;
                self.updated_at = Utc::now();
                Ok(())
            }
            JobStatus::Active => Ok(()),
            JobStatus::Archived => Err(DomainError::invariant("cannot resume an archived job")),
        }
    }

    /// Retire the job. Archival is terminal; history stays queryable.
    pub fn archive(&mut self) {
        self.status = JobStatus::Archived;
        self.updated_at = Utc::now();
    }
}
