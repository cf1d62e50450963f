//! Configuration structures for chunkscan
//!
//! [`ScanConfig`] controls how much of each array gets read, [`SchedulerConfig`]
//! bounds the validation harness, and [`HarnessConfig`] bundles both with the
//! catalog of datasets and environments a run is built from. The harness
//! configuration is persisted as JSON and written atomically.

use crate::error::ScanError;
use crate::sampler::{ChunkSampler, SamplingMode, DEFAULT_PROBE_EXTENT};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of rows requested from tabular elements
pub const DEFAULT_PROBE_ROWS: usize = 10;

/// Default per-task timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Upper bound on the default worker count
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Configuration for element scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Exhaustive or sampled chunk selection
    pub sampling: SamplingMode,
    /// Hard cap on chunks read per array, applied after sampling
    pub max_chunks: Option<usize>,
    /// Per-dimension extent of minimal probe reads
    pub probe_extent: u64,
    /// Rows requested from tabular elements
    pub probe_rows: usize,
    /// Seed for reproducible sampling; unset draws from entropy
    pub sample_seed: Option<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingMode::default(),
            max_chunks: None,
            probe_extent: DEFAULT_PROBE_EXTENT,
            probe_rows: DEFAULT_PROBE_ROWS,
            sample_seed: None,
        }
    }
}

impl ScanConfig {
    /// Create a new scan configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every chunk
    pub fn exhaustive(mut self) -> Self {
        self.sampling = SamplingMode::Exhaustive;
        self
    }

    /// Read at most `budget` chunks per array
    pub fn sampled(mut self, budget: usize) -> Self {
        self.sampling = SamplingMode::Sampled { budget };
        self
    }

    pub fn max_chunks(mut self, max_chunks: Option<usize>) -> Self {
        self.max_chunks = max_chunks;
        self
    }

    pub fn probe_extent(mut self, extent: u64) -> Self {
        self.probe_extent = extent;
        self
    }

    pub fn probe_rows(mut self, rows: usize) -> Self {
        self.probe_rows = rows;
        self
    }

    pub fn sample_seed(mut self, seed: Option<u64>) -> Self {
        self.sample_seed = seed;
        self
    }

    /// Sampler implementing this configuration
    pub fn sampler(&self) -> ChunkSampler {
        ChunkSampler::new(self.sampling).with_seed(self.sample_seed)
    }

    /// Validate the scan configuration
    pub fn validate(&self) -> Result<()> {
        if let SamplingMode::Sampled { budget } = self.sampling {
            if budget < 2 {
                return Err(ScanError::config_error(
                    "scan.sampling.budget",
                    format!("budget {} cannot cover both the first and the last chunk", budget),
                    "Use a budget of at least 2, or exhaustive mode",
                ));
            }
        }

        if self.max_chunks == Some(0) {
            return Err(ScanError::config_error(
                "scan.max_chunks",
                "must be greater than 0 when set",
                "Remove max_chunks or set it to a positive number",
            ));
        }

        if self.probe_extent == 0 {
            return Err(ScanError::config_error(
                "scan.probe_extent",
                "must be greater than 0",
                "Set probe_extent to a positive extent (default: 10)",
            ));
        }

        if self.probe_rows == 0 {
            return Err(ScanError::config_error(
                "scan.probe_rows",
                "must be greater than 0",
                "Set probe_rows to a positive row count (default: 10)",
            ));
        }

        Ok(())
    }

    /// Build the configuration after validation
    pub fn build(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }
}

/// Configuration for the task scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tasks running at the same time
    pub max_workers: usize,
    /// Wall-clock limit per task in seconds
    pub timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            max_workers: cores.min(DEFAULT_MAX_WORKERS),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate the scheduler configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(ScanError::config_error(
                "scheduler.max_workers",
                "must be greater than 0",
                "Use at least 1 worker",
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ScanError::config_error(
                "scheduler.timeout_secs",
                "must be greater than 0",
                "Set a per-task timeout in seconds (default: 120)",
            ));
        }

        Ok(())
    }

    pub fn build(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }
}

/// A dataset known to the harness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub name: String,
    /// Path or URL the container is loaded from
    pub location: String,
}

impl DatasetSpec {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
        }
    }
}

/// A library environment tasks run under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub name: String,
    /// Directory holding the environment's project files
    pub directory: PathBuf,
}

impl EnvironmentSpec {
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
        }
    }
}

/// Datasets and environments a run is built from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub datasets: Vec<DatasetSpec>,
    #[serde(default)]
    pub environments: Vec<EnvironmentSpec>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dataset(mut self, dataset: DatasetSpec) -> Self {
        self.datasets.push(dataset);
        self
    }

    pub fn environment(mut self, environment: EnvironmentSpec) -> Self {
        self.environments.push(environment);
        self
    }

    /// Datasets whose name contains `filter`, ignoring case
    pub fn select_datasets(&self, filter: Option<&str>) -> Result<Vec<DatasetSpec>> {
        let selected: Vec<DatasetSpec> = match filter {
            Some(needle) => {
                let needle = needle.to_lowercase();
                self.datasets
                    .iter()
                    .filter(|d| d.name.to_lowercase().contains(&needle))
                    .cloned()
                    .collect()
            }
            None => self.datasets.clone(),
        };

        if selected.is_empty() {
            return Err(ScanError::config_error(
                "catalog.datasets",
                match filter {
                    Some(needle) => format!("no dataset matches '{}'", needle),
                    None => "no datasets configured".to_string(),
                },
                format!("Available datasets: {}", join_names(self.datasets.iter().map(|d| d.name.as_str()))),
            ));
        }
        Ok(selected)
    }

    /// Environments named exactly `filter`, or all of them
    pub fn select_environments(&self, filter: Option<&str>) -> Result<Vec<EnvironmentSpec>> {
        let selected: Vec<EnvironmentSpec> = self
            .environments
            .iter()
            .filter(|e| filter.map_or(true, |name| e.name == name))
            .cloned()
            .collect();

        if selected.is_empty() {
            return Err(ScanError::config_error(
                "catalog.environments",
                match filter {
                    Some(name) => format!("unknown environment '{}'", name),
                    None => "no environments configured".to_string(),
                },
                format!(
                    "Available environments: {}",
                    join_names(self.environments.iter().map(|e| e.name.as_str()))
                ),
            ));
        }
        Ok(selected)
    }

    fn validate(&self) -> Result<()> {
        for (i, dataset) in self.datasets.iter().enumerate() {
            if dataset.name.trim().is_empty() {
                return Err(ScanError::config_error(
                    format!("catalog.datasets[{}].name", i),
                    "cannot be empty",
                    "Give every dataset a name",
                ));
            }
        }
        for (i, environment) in self.environments.iter().enumerate() {
            if environment.name.trim().is_empty() {
                return Err(ScanError::config_error(
                    format!("catalog.environments[{}].name", i),
                    "cannot be empty",
                    "Give every environment a name",
                ));
            }
            if self.environments[..i].iter().any(|e| e.name == environment.name) {
                return Err(ScanError::config_error(
                    format!("catalog.environments[{}].name", i),
                    format!("duplicate environment '{}'", environment.name),
                    "Environment names must be unique",
                ));
            }
        }
        Ok(())
    }
}

fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let names: Vec<&str> = names.collect();
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}

/// Complete configuration of a validation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub catalog: Catalog,
    /// Worker command, one argument per entry, with `{location}`, `{dataset}`,
    /// `{environment}` and `{environment_dir}` placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<Vec<String>>,
    /// Provisioning command with `{environment}` and `{environment_dir}` placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provision: Option<Vec<String>>,
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan(mut self, scan: ScanConfig) -> Self {
        self.scan = scan;
        self
    }

    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn probe(mut self, command: Option<Vec<String>>) -> Self {
        self.probe = command;
        self
    }

    pub fn provision(mut self, command: Option<Vec<String>>) -> Self {
        self.provision = command;
        self
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.scan.validate()?;
        self.scheduler.validate()?;
        self.catalog.validate()?;

        for (field, command) in [("probe", &self.probe), ("provision", &self.provision)] {
            if let Some(argv) = command {
                if argv.first().map_or(true, |program| program.trim().is_empty()) {
                    return Err(ScanError::config_error(
                        field,
                        "command template is empty",
                        "Give the program as the first entry, e.g. [\"uv\", \"run\", ...]",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ScanError::from(e).with_file_context(path, "read configuration"))?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| ScanError::from(e).with_file_context(path, "parse configuration"))?;
        config
            .validate()
            .map_err(|e| e.with_file_context(path, "validate configuration"))?;
        Ok(config)
    }

    /// Write the configuration atomically through a temporary file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.validate()?;

        let json_content = serde_json::to_string_pretty(self)
            .map_err(|e| ScanError::Config(format!("Failed to serialize configuration: {}", e)))?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json_content).map_err(|e| ScanError::from(e).with_file_context(&temp_path, "write configuration"))?;

        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            ScanError::from(e).with_file_context(path, "replace configuration")
        })?;

        Ok(())
    }
}
