//! Pipeline configuration.
//!
//! One aggregate with per-component sections; defaults are the production
//! values, tests override the handful they care about.

use crate::alerts::EvaluatorConfig;
use crate::dispatch::DispatcherConfig;
use crate::executor::ExecutorConfig;
use crate::retention::RetentionConfig;
use crate::scheduler::SchedulerConfig;

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub scheduler: SchedulerConfig,
    pub executor: ExecutorConfig,
    pub evaluator: EvaluatorConfig,
    pub dispatcher: DispatcherConfig,
    pub retention: RetentionConfig,
}
