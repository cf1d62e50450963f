#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use chunkscan::config::HarnessConfig;
use chunkscan::provision::{CommandProvisioner, EnvironmentProvisioner, NoopProvisioner, ProvisionCache};
use chunkscan::report::{self, OutcomeFormat};
use chunkscan::scheduler::TaskScheduler;
use chunkscan::task::{CommandProbe, ValidationTask};
use clap::{Parser, Subcommand, ValueEnum};
use std::env::VarError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Human,
    Json,
}

impl LogFormat {
    const ENV_KEY: &'static str = "CHUNKSCAN_LOG_FORMAT";

    fn parse(raw: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(raw.trim(), true).map_err(|_| {
            anyhow::anyhow!(
                "invalid {key}={raw:?}; expected one of: human, json",
                key = Self::ENV_KEY
            )
        })
    }

    fn from_env() -> Result<Option<Self>> {
        match std::env::var(Self::ENV_KEY) {
            Ok(value) => Ok(Some(Self::parse(&value)?)),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => {
                bail!("{key} contains non-UTF-8 bytes", key = Self::ENV_KEY)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Markdown,
    Csv,
    Json,
}

impl From<ReportFormat> for OutcomeFormat {
    fn from(format: ReportFormat) -> Self {
        match format {
            ReportFormat::Markdown => Self::Markdown,
            ReportFormat::Csv => Self::Csv,
            ReportFormat::Json => Self::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ContainerFormat {
    Text,
    Json,
}

fn default_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_logging(log_format_override: Option<LogFormat>) -> Result<LogFormat> {
    let format = log_format_override
        .or(LogFormat::from_env()?)
        .unwrap_or(LogFormat::Human);

    match format {
        LogFormat::Human => tracing_subscriber::fmt()
            .with_env_filter(default_env_filter())
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .compact()
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to initialize human logger: {err}"))?,
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_env_filter(default_env_filter())
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to initialize JSON logger: {err}"))?,
    }

    Ok(format)
}

#[derive(Parser)]
#[command(name = "chunkscan", about = "Chunk-level integrity scanning and dataset validation")]
struct Cli {
    /// Log output format (`human` or `json`), written to stderr.
    ///
    /// Precedence: `--log-format` > `CHUNKSCAN_LOG_FORMAT` > `human`.
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate every selected dataset under every selected environment.
    Validate {
        /// Harness configuration file (JSON).
        #[arg(long)]
        config: PathBuf,
        /// Only datasets whose name contains this text (case-insensitive).
        #[arg(long)]
        dataset: Option<String>,
        /// Only the environment with exactly this name.
        #[arg(long)]
        environment: Option<String>,
        /// Report format.
        #[arg(long, value_enum, default_value = "markdown")]
        format: ReportFormat,
        /// Write the report to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Number of tasks run at the same time.
        #[arg(long, conflicts_with = "no_parallel")]
        workers: Option<usize>,
        /// Run tasks one at a time, in submission order.
        #[arg(long)]
        no_parallel: bool,
        /// Per-task timeout in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// List the datasets and environments of a configuration.
    List {
        /// Harness configuration file (JSON).
        #[arg(long)]
        config: PathBuf,
    },
    /// Render a saved container scan result.
    Report {
        /// Container result file (JSON).
        file: PathBuf,
        /// Output format.
        #[arg(long, value_enum, default_value = "text")]
        format: ContainerFormat,
    },
}

// ── Entry point ─────────────────────────────────────────────────────────────

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("error: {error:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    match cli.command {
        Command::Validate {
            config,
            dataset,
            environment,
            format,
            output,
            workers,
            no_parallel,
            timeout_secs,
        } => {
            let mut harness = load_config(&config)?;
            if let Some(workers) = workers {
                harness.scheduler.max_workers = workers;
            }
            if no_parallel {
                harness.scheduler.max_workers = 1;
            }
            if let Some(secs) = timeout_secs {
                harness.scheduler.timeout_secs = secs;
            }
            let selection = Selection {
                dataset: dataset.as_deref(),
                environment: environment.as_deref(),
            };
            validate(&harness, selection, format.into(), output.as_deref())
        }
        Command::List { config } => {
            list(&load_config(&config)?);
            Ok(0)
        }
        Command::Report { file, format } => render_saved(&file, format),
    }
}

fn load_config(path: &Path) -> Result<HarnessConfig> {
    HarnessConfig::load(path).with_context(|| format!("failed to load configuration {}", path.display()))
}

// ── Commands ────────────────────────────────────────────────────────────────

struct Selection<'a> {
    dataset: Option<&'a str>,
    environment: Option<&'a str>,
}

fn validate(
    harness: &HarnessConfig,
    selection: Selection<'_>,
    format: OutcomeFormat,
    output: Option<&Path>,
) -> Result<i32> {
    let datasets = harness.catalog.select_datasets(selection.dataset)?;
    let environments = harness.catalog.select_environments(selection.environment)?;
    let tasks = ValidationTask::product(&datasets, &environments);

    let Some(probe_template) = harness.probe.clone() else {
        bail!("no probe command configured; add a \"probe\" command template to the configuration");
    };
    let probe = Arc::new(CommandProbe::new(probe_template));
    let provisioner: Arc<dyn EnvironmentProvisioner> = match harness.provision.clone() {
        Some(template) => Arc::new(CommandProvisioner::new(template)),
        None => Arc::new(NoopProvisioner),
    };

    let scheduler = TaskScheduler::new(harness.scheduler.clone(), probe)?
        .with_provisioning(Arc::new(ProvisionCache::new(provisioner)));

    info!(
        datasets = datasets.len(),
        environments = environments.len(),
        "validating {} task(s)",
        tasks.len()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let outcomes = runtime.block_on(async {
        let submitted = tasks.len();
        let mut receiver = scheduler.submit_streaming(tasks);
        let mut outcomes = Vec::with_capacity(submitted);
        while let Some(outcome) = receiver.recv().await {
            let mark = if outcome.is_clean() { "✅" } else { "❌" };
            match &outcome.error_kind {
                Some(kind) => warn!("{} {} ({})", mark, outcome.task_id, kind),
                None => info!("{} {}", mark, outcome.task_id),
            }
            outcomes.push(outcome);
        }
        if outcomes.len() != submitted {
            bail!("{} tasks submitted but {} outcomes collected", submitted, outcomes.len());
        }
        Ok(outcomes)
    })?;

    let rendered = report::render_outcomes(&outcomes, format)?;
    match output {
        Some(path) => {
            std::fs::write(path, &rendered).with_context(|| format!("failed to write report {}", path.display()))?;
            info!("report written to {}", path.display());
        }
        None => print!("{rendered}"),
    }

    let stats = scheduler.stats();
    info!(
        succeeded = stats.succeeded,
        failed = stats.failed,
        timed_out = stats.timed_out,
        "validation complete"
    );
    Ok(report::exit_code(&outcomes))
}

fn list(harness: &HarnessConfig) {
    println!("Datasets:");
    for dataset in &harness.catalog.datasets {
        println!("  {:<24} {}", dataset.name, dataset.location);
    }
    println!();
    println!("Environments:");
    for environment in &harness.catalog.environments {
        println!("  {:<24} {}", environment.name, environment.directory.display());
    }
}

fn render_saved(file: &Path, format: ContainerFormat) -> Result<i32> {
    let content = std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let result = report::parse_container_json(&content)
        .with_context(|| format!("{} is not a container result", file.display()))?;

    match format {
        ContainerFormat::Text => println!("{}", report::render_container_text(&result)),
        ContainerFormat::Json => println!("{}", report::render_json(&result)?),
    }
    Ok(if result.is_valid() { 0 } else { 1 })
}
