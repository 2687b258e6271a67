//! Job runs: one execution instance of a job, with its own lifecycle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pricewatch_core::{DomainError, DomainResult, JobId, JobRunId, TenantId};

/// What caused the run to be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// Picked up by the scheduler tick.
    Scheduled,
    /// Forced by an operator outside the normal schedule.
    Manual,
}

/// Classified run failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// The source failed in a way worth retrying soon (timeout, rate-limited).
    AdapterTransient,
    /// The source configuration is broken; retrying will not help.
    AdapterTerminal,
    /// The run exceeded its overall time budget.
    Timeout,
    /// Every entity failed; nothing was collected.
    NoData,
}

/// Structured error detail recorded on a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: RunErrorKind,
    pub message: String,
    /// How many entities failed inside the batch (partial failures included).
    pub failed_entities: u32,
}

impl RunError {
    pub fn transient(message: impl Into<String>, failed_entities: u32) -> Self {
        Self {
            kind: RunErrorKind::AdapterTransient,
            message: message.into(),
            failed_entities,
        }
    }

    pub fn terminal(message: impl Into<String>, failed_entities: u32) -> Self {
        Self {
            kind: RunErrorKind::AdapterTerminal,
            message: message.into(),
            failed_entities,
        }
    }

    pub fn timeout(budget: Duration) -> Self {
        Self {
            kind: RunErrorKind::Timeout,
            message: format!("run exceeded time budget of {budget:?}"),
            failed_entities: 0,
        }
    }

    pub fn no_data(message: impl Into<String>, failed_entities: u32) -> Self {
        Self {
            kind: RunErrorKind::NoData,
            message: message.into(),
            failed_entities,
        }
    }

    /// Transient failures shorten the next run; terminal ones do not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            RunErrorKind::AdapterTransient | RunErrorKind::Timeout | RunErrorKind::NoData
        )
    }
}

/// Run execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Currently executing.
    Running,
    /// Finished; snapshots were written.
    Completed { snapshots_written: u32 },
    /// Finished with a structured error.
    Failed { error: RunError },
}

/// One execution instance of a job.
///
/// Terminal runs are immutable; stores must reject further updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: JobRunId,
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub trigger: RunTrigger,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Retired by the retention sweep; kept as audit trail.
    pub archived: bool,
}

impl JobRun {
    pub fn new(job_id: JobId, tenant_id: TenantId, trigger: RunTrigger, now: DateTime<Utc>) -> Self {
        Self {
            id: JobRunId::new(),
            job_id,
            tenant_id,
            trigger,
            status: RunStatus::Running,
            started_at: now,
            completed_at: None,
            archived: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, RunStatus::Running)
    }

    /// A `running` run older than the threshold is considered lost; the
    /// scheduler's watchdog fails it and frees the job's run slot.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        matches!(self.status, RunStatus::Running)
            && now - self.started_at > chrono::Duration::from_std(threshold).unwrap_or_default()
    }

    pub fn complete(&mut self, now: DateTime<Utc>, snapshots_written: u32) -> DomainResult<()> {
        if self.is_terminal() {
            return Err(DomainError::invariant("run already finished"));
        }
        self.status = RunStatus::Completed { snapshots_written };
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, now: DateTime<Utc>, error: RunError) -> DomainResult<()> {
        if self.is_terminal() {
            return Err(DomainError::invariant("run already finished"));
        }
        self.status = RunStatus::Failed { error };
        self.completed_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_run() -> JobRun {
        JobRun::new(JobId::new(), TenantId::new(), RunTrigger::Scheduled, Utc::now())
    }

    #[test]
    fn completes_once() {
        let mut run = test_run();
        run.complete(Utc::now(), 3).unwrap();

        assert!(run.is_terminal());
        assert!(run.completed_at.is_some());
        assert!(run.complete(Utc::now(), 3).is_err());
        assert!(run.fail(Utc::now(), RunError::timeout(Duration::from_secs(1))).is_err());
    }

    #[test]
    fn failure_keeps_structured_detail() {
        let mut run = test_run();
        run.fail(Utc::now(), RunError::transient("source rate-limited us", 2))
            .unwrap();

        match &run.status {
            RunStatus::Failed { error } => {
                assert_eq!(error.kind, RunErrorKind::AdapterTransient);
                assert_eq!(error.failed_entities, 2);
                assert!(error.is_transient());
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn staleness_only_applies_to_running_runs() {
        let mut run = test_run();
        run.started_at = Utc::now() - chrono::Duration::minutes(30);

        assert!(run.is_stale(Utc::now(), Duration::from_secs(15 * 60)));

        run.complete(Utc::now(), 0).unwrap();
        assert!(!run.is_stale(Utc::now(), Duration::from_secs(15 * 60)));
    }
}
