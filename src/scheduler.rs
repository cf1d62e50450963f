//! Bounded-concurrency execution of validation tasks
//!
//! The [`TaskScheduler`] runs every submitted [`ValidationTask`] through a
//! [`ValidationProbe`] with at most `max_workers` tasks in flight and a
//! wall-clock limit per task. Whatever happens inside a task (a failure, a
//! panic or a hang) ends up as that task's [`ValidationOutcome`]; nothing a task
//! does can take down the run or be attributed to a sibling.
//!
//! # Key Features
//!
//! - **Backpressure**: tasks wait for a free worker slot in submission order
//! - **Timeouts**: an overrunning task is aborted, its slot reclaimed, and a
//!   `TimedOut` outcome emitted without any summary
//! - **Streaming**: outcomes are delivered in completion order as they finish
//! - **Bijection**: [`TaskScheduler::submit`] checks that every task produced
//!   exactly one outcome
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use chunkscan::config::{DatasetSpec, EnvironmentSpec, SchedulerConfig};
//! use chunkscan::scheduler::TaskScheduler;
//! use chunkscan::task::{CommandProbe, ValidationTask};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let probe = CommandProbe::new(vec!["worker".into(), "{location}".into()]);
//! let scheduler = TaskScheduler::new(SchedulerConfig::new().max_workers(4), Arc::new(probe))?;
//!
//! let tasks = ValidationTask::product(
//!     &[DatasetSpec::new("blobs", "data/blobs.zarr")],
//!     &[EnvironmentSpec::new("0.6.1", "envs/v0.6.1")],
//! );
//! for outcome in scheduler.submit(tasks).await? {
//!     println!("{}: {:?}", outcome.task_id, outcome.state());
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::SchedulerConfig;
use crate::error::ScanError;
use crate::identifiers::{RunId, TaskId};
use crate::provision::ProvisionCache;
use crate::task::{describe_join_error, ProbeFailure, TaskState, ValidationOutcome, ValidationProbe, ValidationTask};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Counters over every task this scheduler has run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
}

impl SchedulerStats {
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed + self.timed_out
    }

    pub fn in_flight(&self) -> u64 {
        self.submitted.saturating_sub(self.completed())
    }
}

#[derive(Debug, Default)]
struct StatsCounters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

impl StatsCounters {
    fn record(&self, state: TaskState) {
        let counter = match state {
            TaskState::Succeeded => &self.succeeded,
            TaskState::TimedOut => &self.timed_out,
            _ => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

/// Runs validation tasks on a bounded pool of workers
pub struct TaskScheduler {
    config: SchedulerConfig,
    probe: Arc<dyn ValidationProbe>,
    provisioning: Arc<ProvisionCache>,
    counters: Arc<StatsCounters>,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig, probe: Arc<dyn ValidationProbe>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            probe,
            provisioning: Arc::new(ProvisionCache::noop()),
            counters: Arc::new(StatsCounters::default()),
        })
    }

    /// Provision each task's environment through `cache` before it runs
    pub fn with_provisioning(mut self, cache: Arc<ProvisionCache>) -> Self {
        self.provisioning = cache;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }

    /// Start running `tasks` and stream their outcomes in completion order
    ///
    /// The receiver closes once every task has reported. Must be called from
    /// within a Tokio runtime.
    pub fn submit_streaming(&self, tasks: Vec<ValidationTask>) -> mpsc::UnboundedReceiver<ValidationOutcome> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let run_id = RunId::new();
        let slots = Arc::new(Semaphore::new(self.config.max_workers));
        let limit = self.config.timeout();
        let probe = Arc::clone(&self.probe);
        let provisioning = Arc::clone(&self.provisioning);
        let counters = Arc::clone(&self.counters);

        counters.submitted.fetch_add(tasks.len() as u64, Ordering::Relaxed);
        info!(
            %run_id,
            tasks = tasks.len(),
            max_workers = self.config.max_workers,
            timeout_secs = self.config.timeout_secs,
            "starting validation run"
        );

        tokio::spawn(async move {
            let started = Instant::now();
            let mut workers = JoinSet::new();

            for task in tasks {
                debug!(%run_id, task = %task.id, "task pending");
                let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                    error!(%run_id, "worker slots closed, abandoning remaining tasks");
                    break;
                };

                let sender = sender.clone();
                let probe = Arc::clone(&probe);
                let provisioning = Arc::clone(&provisioning);
                let counters = Arc::clone(&counters);
                workers.spawn(async move {
                    let outcome = run_task(task, probe, provisioning, limit).await;
                    counters.record(outcome.state());
                    debug!(%run_id, task = %outcome.task_id, state = ?outcome.state(), "task finished");
                    let _ = sender.send(outcome);
                    drop(permit);
                });
            }

            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    error!(%run_id, error = %describe_join_error(e), "worker bookkeeping failed");
                }
            }

            let stats = counters.snapshot();
            info!(
                %run_id,
                succeeded = stats.succeeded,
                failed = stats.failed,
                timed_out = stats.timed_out,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "validation run finished"
            );
        });

        receiver
    }

    /// Run `tasks` to completion and collect one outcome per task
    ///
    /// Outcomes are in completion order; with one worker that is submission
    /// order. Fails only when the scheduler loses track of a task.
    pub async fn submit(&self, tasks: Vec<ValidationTask>) -> Result<Vec<ValidationOutcome>> {
        let expected: HashSet<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();
        let submitted = tasks.len();

        let mut receiver = self.submit_streaming(tasks);
        let mut outcomes = Vec::with_capacity(submitted);
        while let Some(outcome) = receiver.recv().await {
            outcomes.push(outcome);
        }

        if outcomes.len() != submitted {
            return Err(ScanError::Scheduler(format!(
                "{} tasks submitted but {} outcomes collected",
                submitted,
                outcomes.len()
            )));
        }
        if let Some(stray) = outcomes.iter().find(|o| !expected.contains(&o.task_id)) {
            return Err(ScanError::Scheduler(format!(
                "outcome for unknown task '{}'",
                stray.task_id
            )));
        }
        Ok(outcomes)
    }
}

/// Provision, then run the probe, both under the timeout
///
/// An environment setup that hangs times the task out like a hanging probe.
/// Aborting mid-setup leaves the environment unsettled, so the next task of
/// that environment starts the setup again.
async fn run_task(
    task: ValidationTask,
    probe: Arc<dyn ValidationProbe>,
    provisioning: Arc<ProvisionCache>,
    limit: Duration,
) -> ValidationOutcome {
    debug!(task = %task.id, "task running");
    let started = Instant::now();
    let mut attempt = JoinSet::new();
    {
        let task = task.clone();
        attempt.spawn(async move {
            if let Err(e) = provisioning.ensure(&task.environment).await {
                return Err(ProbeFailure::other(format!(
                    "Environment '{}' provisioning failed: {}",
                    task.environment.name, e
                )));
            }
            probe.run(&task).await
        });
    }

    match timeout(limit, attempt.join_next()).await {
        Ok(Some(Ok(Ok(success)))) => ValidationOutcome::success(&task, success, started.elapsed()),
        Ok(Some(Ok(Err(failure)))) => {
            debug!(task = %task.id, error = %failure, "task failed");
            ValidationOutcome::failure(&task, failure, started.elapsed())
        }
        Ok(Some(Err(join_error))) => {
            let message = describe_join_error(join_error);
            error!(task = %task.id, %message, "task crashed");
            ValidationOutcome::failure(&task, ProbeFailure::other(message), started.elapsed())
        }
        Ok(None) => ValidationOutcome::failure(
            &task,
            ProbeFailure::other("task was never started"),
            started.elapsed(),
        ),
        Err(_) => {
            attempt.abort_all();
            warn!(task = %task.id, timeout_secs = limit.as_secs_f64(), "task timed out, worker aborted");
            ValidationOutcome::timed_out(&task, limit, started.elapsed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatasetSpec, EnvironmentSpec};
    use crate::provision::EnvironmentProvisioner;
    use crate::task::{OutcomeErrorKind, ProbeSuccess};
    use async_trait::async_trait;

    struct ScriptedProbe;

    #[async_trait]
    impl ValidationProbe for ScriptedProbe {
        async fn run(&self, task: &ValidationTask) -> std::result::Result<ProbeSuccess, ProbeFailure> {
            match task.id.dataset.as_str() {
                "fails" => Err(ProbeFailure::load("ValueError: corrupt attrs")),
                "panics" => panic!("decoder exploded"),
                "hangs" => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(ProbeSuccess::default())
                }
                _ => Ok(ProbeSuccess::default()),
            }
        }
    }

    fn tasks(names: &[&str]) -> Vec<ValidationTask> {
        let env = EnvironmentSpec::new("0.6.1", "envs/v0.6.1");
        names
            .iter()
            .map(|name| ValidationTask::new(&DatasetSpec::new(*name, format!("{}.zarr", name)), &env))
            .collect()
    }

    fn scheduler(workers: usize, timeout_secs: u64) -> TaskScheduler {
        let config = SchedulerConfig::new().max_workers(workers).timeout_secs(timeout_secs);
        TaskScheduler::new(config, Arc::new(ScriptedProbe)).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = SchedulerConfig::new().max_workers(0);
        assert!(TaskScheduler::new(config, Arc::new(ScriptedProbe)).is_err());
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let scheduler = scheduler(3, 10);
        let outcomes = scheduler.submit(tasks(&["a", "fails", "b", "panics", "c"])).await.unwrap();
        assert_eq!(outcomes.len(), 5);

        for outcome in &outcomes {
            match outcome.task_id.dataset.as_str() {
                "fails" => assert_eq!(outcome.error_kind, Some(OutcomeErrorKind::LoadError)),
                "panics" => {
                    assert_eq!(outcome.error_kind, Some(OutcomeErrorKind::Other));
                    assert!(outcome.error_message.as_deref().unwrap_or_default().contains("decoder exploded"));
                }
                _ => assert!(outcome.succeeded),
            }
        }

        let stats = scheduler.stats();
        assert_eq!(stats.submitted, 5);
        assert_eq!(stats.succeeded, 3);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reclaims_slot() {
        let scheduler = scheduler(1, 5);
        let outcomes = scheduler.submit(tasks(&["hangs", "a", "b"])).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].state(), TaskState::TimedOut);
        assert!(outcomes[0].extracted_summary.is_none());
        assert!(outcomes[1].succeeded && outcomes[2].succeeded);
        assert_eq!(scheduler.stats().timed_out, 1);
    }

    struct StalledProvisioner {
        fail: bool,
    }

    #[async_trait]
    impl EnvironmentProvisioner for StalledProvisioner {
        async fn provision(&self, environment: &EnvironmentSpec) -> std::result::Result<(), String> {
            if self.fail {
                return Err(format!("no lockfile for {}", environment.name));
            }
            tokio::time::sleep(Duration::from_secs(86_400)).await;
            Ok(())
        }
    }

    fn provisioned_scheduler(timeout_secs: u64, fail: bool) -> TaskScheduler {
        let config = SchedulerConfig::new().max_workers(1).timeout_secs(timeout_secs);
        let cache = Arc::new(ProvisionCache::new(Arc::new(StalledProvisioner { fail })));
        TaskScheduler::new(config, Arc::new(ScriptedProbe)).unwrap().with_provisioning(cache)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_provisioning_times_out() {
        let scheduler = provisioned_scheduler(5, false);
        let started = tokio::time::Instant::now();

        let outcomes = scheduler.submit(tasks(&["a", "b"])).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.state() == TaskState::TimedOut));
        assert_eq!(outcomes[0].error_message.as_deref(), Some("Task timed out after 5 seconds"));
        // one timeout per task; the day-long setup never finishes
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(scheduler.stats().timed_out, 2);
    }

    #[tokio::test]
    async fn test_provisioning_failure_fails_task() {
        let outcomes = provisioned_scheduler(10, true).submit(tasks(&["a"])).await.unwrap();

        assert_eq!(outcomes[0].state(), TaskState::Failed);
        assert_eq!(outcomes[0].error_kind, Some(OutcomeErrorKind::Other));
        assert_eq!(
            outcomes[0].error_message.as_deref(),
            Some("Environment '0.6.1' provisioning failed: no lockfile for 0.6.1")
        );
    }

    #[tokio::test]
    async fn test_single_worker_preserves_submission_order() {
        let names = ["d", "c", "fails", "b", "a"];
        let outcomes = scheduler(1, 10).submit(tasks(&names)).await.unwrap();
        let order: Vec<&str> = outcomes.iter().map(|o| o.task_id.dataset.as_str()).collect();
        assert_eq!(order, names);
    }

    #[tokio::test]
    async fn test_empty_submission() {
        let outcomes = scheduler(2, 10).submit(Vec::new()).await.unwrap();
        assert!(outcomes.is_empty());
    }
}
