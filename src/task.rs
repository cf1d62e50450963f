//! Validation tasks and the probes that run them
//!
//! A [`ValidationTask`] pairs one dataset with one environment. A
//! [`ValidationProbe`] performs the work of a task and reports either a
//! [`ProbeSuccess`] or a classified [`ProbeFailure`]; the scheduler wraps
//! either into a [`ValidationOutcome`].
//!
//! Two probes are provided:
//!
//! - [`ScanProbe`] loads the container in-process and runs the
//!   [`ContainerScanner`] on a blocking thread.
//! - [`CommandProbe`] runs a worker command in a child process and parses the
//!   JSON report it prints as its last line of output. The child is killed when
//!   the task is abandoned, so a hung or crashing decoder stays contained.

use crate::config::{DatasetSpec, EnvironmentSpec, ScanConfig};
use crate::container_scanner::ContainerScanner;
use crate::error::panic_message;
use crate::identifiers::TaskId;
use crate::integrity::ScanStats;
use crate::store::{Container, ContainerLoader};
use crate::structures::{ContainerResult, ElementGroup};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::task::JoinError;
use tracing::debug;

/// One dataset probed under one environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationTask {
    pub id: TaskId,
    /// Location the container is loaded from
    pub location: String,
    pub environment: EnvironmentSpec,
}

impl ValidationTask {
    pub fn new(dataset: &DatasetSpec, environment: &EnvironmentSpec) -> Self {
        Self {
            id: TaskId::new(&dataset.name, &environment.name),
            location: dataset.location.clone(),
            environment: environment.clone(),
        }
    }

    /// Every dataset paired with every environment, dataset-major
    pub fn product(datasets: &[DatasetSpec], environments: &[EnvironmentSpec]) -> Vec<Self> {
        datasets
            .iter()
            .flat_map(|dataset| environments.iter().map(move |env| Self::new(dataset, env)))
            .collect()
    }
}

/// Lifecycle of a task inside the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

/// Why a task failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeErrorKind {
    /// The container could not be loaded or the worker reported a failure
    LoadError,
    /// The task ran past its timeout and was abandoned
    TimeoutError,
    /// The task's own report was malformed
    ParseError,
    /// Provisioning, spawning or a crash
    Other,
}

impl OutcomeErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoadError => "LoadError",
            Self::TimeoutError => "TimeoutError",
            Self::ParseError => "ParseError",
            Self::Other => "Other",
        }
    }
}

impl Display for OutcomeErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compact description of what a loaded container holds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedSummary {
    /// Element names per group; an empty list means present but unnamed
    #[serde(default)]
    pub elements: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub coordinate_systems: Vec<String>,
}

impl ExtractedSummary {
    /// Summarize a container, skipping groups that cannot be listed
    pub fn from_container(container: &dyn Container) -> Self {
        let elements = ElementGroup::ALL
            .into_iter()
            .filter(|&group| container.has_group(group))
            .filter_map(|group| {
                container
                    .element_names(group)
                    .ok()
                    .map(|names| (group.as_str().to_string(), names))
            })
            .collect();

        Self {
            elements,
            coordinate_systems: container.coordinate_systems(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.coordinate_systems.is_empty()
    }
}

/// Final record of one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub task_id: TaskId,
    pub location: String,
    pub succeeded: bool,
    pub error_kind: Option<OutcomeErrorKind>,
    pub error_message: Option<String>,
    pub extracted_summary: Option<ExtractedSummary>,
    /// Chunk-level result when the probe scanned the container
    #[serde(default)]
    pub integrity: Option<ContainerResult>,
    pub elapsed_ms: u64,
}

impl ValidationOutcome {
    pub fn success(task: &ValidationTask, success: ProbeSuccess, elapsed: Duration) -> Self {
        Self {
            task_id: task.id.clone(),
            location: task.location.clone(),
            succeeded: true,
            error_kind: None,
            error_message: None,
            extracted_summary: Some(success.summary),
            integrity: success.integrity,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn failure(task: &ValidationTask, failure: ProbeFailure, elapsed: Duration) -> Self {
        Self {
            task_id: task.id.clone(),
            location: task.location.clone(),
            succeeded: false,
            error_kind: Some(failure.kind),
            error_message: Some(failure.message),
            extracted_summary: None,
            integrity: None,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Outcome of a task abandoned at its timeout; carries no summary
    pub fn timed_out(task: &ValidationTask, timeout: Duration, elapsed: Duration) -> Self {
        Self::failure(
            task,
            ProbeFailure::new(
                OutcomeErrorKind::TimeoutError,
                format!("Task timed out after {} seconds", timeout.as_secs_f64()),
            ),
            elapsed,
        )
    }

    pub fn state(&self) -> TaskState {
        match (self.succeeded, self.error_kind) {
            (true, _) => TaskState::Succeeded,
            (false, Some(OutcomeErrorKind::TimeoutError)) => TaskState::TimedOut,
            (false, _) => TaskState::Failed,
        }
    }

    /// Succeeded and, when scanned, found no integrity problem
    pub fn is_clean(&self) -> bool {
        self.succeeded && self.integrity.as_ref().map_or(true, ContainerResult::is_valid)
    }
}

/// What a successful probe hands back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeSuccess {
    pub summary: ExtractedSummary,
    pub integrity: Option<ContainerResult>,
}

/// A classified probe failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ProbeFailure {
    pub kind: OutcomeErrorKind,
    pub message: String,
}

impl ProbeFailure {
    pub fn new(kind: OutcomeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn load(message: impl Into<String>) -> Self {
        Self::new(OutcomeErrorKind::LoadError, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(OutcomeErrorKind::Other, message)
    }
}

/// Performs the work of one validation task
#[async_trait]
pub trait ValidationProbe: Send + Sync {
    async fn run(&self, task: &ValidationTask) -> Result<ProbeSuccess, ProbeFailure>;
}

/// Describe a failed join of a spawned task
pub(crate) fn describe_join_error(error: JoinError) -> String {
    if error.is_cancelled() {
        return "task was cancelled".to_string();
    }
    format!("worker panicked: {}", panic_message(error.into_panic().as_ref()))
}

/// Loads and scans containers in this process
pub struct ScanProbe {
    loader: Arc<dyn ContainerLoader>,
    scanner: Arc<ContainerScanner>,
    groups: Option<Vec<ElementGroup>>,
}

impl ScanProbe {
    /// Create a probe, rejecting an invalid scan configuration
    pub fn new(loader: Arc<dyn ContainerLoader>, config: ScanConfig) -> crate::Result<Self> {
        Ok(Self {
            loader,
            scanner: Arc::new(ContainerScanner::new(config)?),
            groups: None,
        })
    }

    /// Restrict scanning to some element groups
    pub fn groups(mut self, groups: Vec<ElementGroup>) -> Self {
        self.groups = Some(groups);
        self
    }

    /// Counters accumulated over every container this probe scanned
    pub fn stats(&self) -> ScanStats {
        self.scanner.stats()
    }
}

#[async_trait]
impl ValidationProbe for ScanProbe {
    async fn run(&self, task: &ValidationTask) -> Result<ProbeSuccess, ProbeFailure> {
        let loader = Arc::clone(&self.loader);
        let scanner = Arc::clone(&self.scanner);
        let groups = self.groups.clone();
        let location = task.location.clone();

        let scan = tokio::task::spawn_blocking(move || -> Result<ProbeSuccess, ProbeFailure> {
            let container = loader
                .load(&location)
                .map_err(|e| ProbeFailure::load(format!("{}: {}", e.type_name(), e.message())))?;
            let summary = ExtractedSummary::from_container(container.as_ref());
            let integrity = scanner.scan_at(container.as_ref(), &location, groups.as_deref());
            Ok(ProbeSuccess {
                summary,
                integrity: Some(integrity),
            })
        });

        scan.await
            .map_err(|e| ProbeFailure::other(describe_join_error(e)))?
    }
}

/// Elements as a worker reports them: a name list or a presence flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportedElements {
    Names(Vec<String>),
    Present(bool),
}

/// JSON document a worker prints as its last line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<BTreeMap<String, ReportedElements>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate_systems: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<ContainerResult>,
}

impl ProbeReport {
    /// Parse the last non-empty line of a worker's stdout
    pub fn from_stdout(stdout: &str) -> Result<Self, serde_json::Error> {
        let last_line = stdout.lines().rev().find(|line| !line.trim().is_empty()).unwrap_or("");
        serde_json::from_str(last_line.trim())
    }

    pub fn into_result(self) -> Result<ProbeSuccess, ProbeFailure> {
        if !self.success {
            return Err(ProbeFailure::load(format!(
                "{}: {}",
                self.error_type.as_deref().unwrap_or("UnknownError"),
                self.error_message.as_deref().unwrap_or("No error message"),
            )));
        }

        let elements = self
            .elements
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(group, listed)| match listed {
                ReportedElements::Names(names) => Some((group, names)),
                ReportedElements::Present(true) => Some((group, Vec::new())),
                ReportedElements::Present(false) => None,
            })
            .collect();

        Ok(ProbeSuccess {
            summary: ExtractedSummary {
                elements,
                coordinate_systems: self.coordinate_systems.unwrap_or_default(),
            },
            integrity: self.integrity,
        })
    }
}

/// Runs each task in a child process built from a command template
///
/// Template entries may contain `{location}`, `{dataset}`, `{environment}` and
/// `{environment_dir}`; the first entry is the program.
pub struct CommandProbe {
    template: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandProbe {
    pub fn new(template: Vec<String>) -> Self {
        Self {
            template,
            working_dir: None,
        }
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// The argument vector for `task`
    pub fn render(&self, task: &ValidationTask) -> Vec<String> {
        let environment_dir = task.environment.directory.display().to_string();
        let values = [
            ("location", task.location.as_str()),
            ("dataset", task.id.dataset.as_str()),
            ("environment_dir", environment_dir.as_str()),
            ("environment", task.id.environment.as_str()),
        ];
        self.template.iter().map(|arg| substitute(arg, &values)).collect()
    }
}

/// Replace `{name}` placeholders in one left-to-right pass
///
/// Substituted text is never scanned again. Unknown names and unmatched
/// braces are kept as written.
pub(crate) fn substitute(template: &str, values: &[(&str, &str)]) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let tail = &rest[open..];
        let known = tail.find('}').and_then(|close| {
            let name = &tail[1..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (close, *value))
        });
        match known {
            Some((close, value)) => {
                rendered.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                rendered.push('{');
                rest = &tail[1..];
            }
        }
    }

    rendered.push_str(rest);
    rendered
}

#[async_trait]
impl ValidationProbe for CommandProbe {
    async fn run(&self, task: &ValidationTask) -> Result<ProbeSuccess, ProbeFailure> {
        let argv = self.render(task);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ProbeFailure::other("probe command template is empty"))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!(task = %task.id, program = %program, "spawning worker");
        let output = command
            .output()
            .await
            .map_err(|e| ProbeFailure::other(format!("failed to start worker '{}': {}", program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(task = %task.id, status = %output.status, "worker exited");

        let report = ProbeReport::from_stdout(&stdout).map_err(|_| {
            ProbeFailure::new(
                OutcomeErrorKind::ParseError,
                format!("Could not parse output: {}\nStderr: {}", stdout, stderr),
            )
        })?;
        report.into_result()
    }
}
