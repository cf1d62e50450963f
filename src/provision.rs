//! Environment provisioning shared across tasks
//!
//! Every task of one environment needs that environment set up once. The
//! [`ProvisionCache`] keeps one once-cell per environment name: the first task
//! to ask runs the provisioner, concurrent askers wait for that same result, and
//! later askers read it back. A failed setup is cached too, so every task of a
//! broken environment fails the same way without retrying the setup.

use crate::config::EnvironmentSpec;
use crate::task::substitute;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Prepares an environment before tasks run in it
#[async_trait]
pub trait EnvironmentProvisioner: Send + Sync {
    async fn provision(&self, environment: &EnvironmentSpec) -> Result<(), String>;
}

/// Treats every environment as ready
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProvisioner;

#[async_trait]
impl EnvironmentProvisioner for NoopProvisioner {
    async fn provision(&self, _environment: &EnvironmentSpec) -> Result<(), String> {
        Ok(())
    }
}

/// Runs a setup command per environment
///
/// Template entries may contain `{environment}` and `{environment_dir}`.
pub struct CommandProvisioner {
    template: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandProvisioner {
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

    pub fn render(&self, environment: &EnvironmentSpec) -> Vec<String> {
        let directory = environment.directory.display().to_string();
        let values = [
            ("environment_dir", directory.as_str()),
            ("environment", environment.name.as_str()),
        ];
        self.template.iter().map(|arg| substitute(arg, &values)).collect()
    }
}

#[async_trait]
impl EnvironmentProvisioner for CommandProvisioner {
    async fn provision(&self, environment: &EnvironmentSpec) -> Result<(), String> {
        let argv = self.render(environment);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| "provision command template is empty".to_string())?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .await
            .map_err(|e| format!("failed to start '{}': {}", program, e))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!("'{}' exited with {}: {}", program, output.status, stderr.trim()))
        }
    }
}

type ProvisionCell = Arc<OnceCell<Result<(), String>>>;

/// Runs a provisioner at most once per environment name
pub struct ProvisionCache {
    provisioner: Arc<dyn EnvironmentProvisioner>,
    cells: Mutex<HashMap<String, ProvisionCell>>,
}

impl ProvisionCache {
    pub fn new(provisioner: Arc<dyn EnvironmentProvisioner>) -> Self {
        Self {
            provisioner,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Cache that provisions nothing
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopProvisioner))
    }

    /// Make sure `environment` is provisioned, waiting for a concurrent setup
    pub async fn ensure(&self, environment: &EnvironmentSpec) -> Result<(), String> {
        let cell = {
            let mut cells = self.cells.lock();
            Arc::clone(cells.entry(environment.name.clone()).or_default())
        };

        cell.get_or_init(|| async {
            info!(environment = %environment.name, "provisioning environment");
            let result = self.provisioner.provision(environment).await;
            match &result {
                Ok(()) => debug!(environment = %environment.name, "environment ready"),
                Err(e) => warn!(environment = %environment.name, error = %e, "provisioning failed"),
            }
            result
        })
        .await
        .clone()
    }

    /// Environments with a settled provisioning result
    pub fn provisioned(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .cells
            .lock()
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}
