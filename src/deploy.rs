//! Out-of-band execution of the deployment script
//!
//! The webhook handler only decides to deploy; the run itself happens in a
//! detached task and its outcome is visible solely through the logs.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::DeploySettings;

/// Result of a single deployment run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentOutcome {
    Succeeded {
        stdout: String,
        stderr: String,
    },
    /// The action ran and exited non-zero. `exit_code` is None when the
    /// process was terminated by a signal.
    Failed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    TimedOut {
        after: Duration,
    },
    /// The action could not be started at all.
    LaunchFailed {
        reason: String,
    },
}

impl DeploymentOutcome {
    pub fn from_output(output: Output) -> Self {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.success() {
            DeploymentOutcome::Succeeded { stdout, stderr }
        } else {
            DeploymentOutcome::Failed {
                exit_code: output.status.code(),
                stdout,
                stderr,
            }
        }
    }

    /// Emit the outcome of run `run_id` for `branch`.
    pub fn log(&self, run_id: Uuid, branch: &str) {
        match self {
            DeploymentOutcome::Succeeded { stdout, .. } => {
                info!(%run_id, "Deployment for branch '{}' succeeded", branch);
                debug!(%run_id, "Deployment output:\n{}", stdout);
            }
            DeploymentOutcome::Failed {
                exit_code,
                stdout,
                stderr,
            } => {
                error!(
                    %run_id,
                    "Deployment for branch '{}' failed with exit code {}:\n{}",
                    branch,
                    exit_code.map_or_else(|| "none (signal)".to_string(), |c| c.to_string()),
                    stderr.trim_end()
                );
                debug!(%run_id, "Deployment output:\n{}", stdout);
            }
            DeploymentOutcome::TimedOut { after } => {
                error!(
                    %run_id,
                    "Deployment for branch '{}' timed out after {:?} and was killed",
                    branch,
                    after
                );
            }
            DeploymentOutcome::LaunchFailed { reason } => {
                error!(
                    %run_id,
                    "Deployment for branch '{}' could not be started: {}",
                    branch,
                    reason
                );
            }
        }
    }
}

/// Something that can carry out a deployment.
///
/// Implementations report every failure through the returned outcome rather
/// than panicking, since nobody awaits the task they run in.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn run(&self, branch: &str) -> DeploymentOutcome;
}

/// Runs a fixed script with a fixed interpreter.
///
/// Nothing from the webhook payload reaches the command line; the branch is
/// only used for log context.
pub struct ScriptDeployer {
    interpreter: String,
    script: PathBuf,
    working_dir: PathBuf,
    timeout: Option<Duration>,
    run_lock: Option<Mutex<()>>,
}

impl ScriptDeployer {
    pub fn new(settings: &DeploySettings) -> Self {
        Self {
            interpreter: settings.interpreter.clone(),
            script: settings.script_path(),
            working_dir: settings.app_root.clone(),
            timeout: settings.timeout_secs.map(Duration::from_secs),
            run_lock: settings.serialize.then(|| Mutex::new(())),
        }
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn execute(&self, branch: &str) -> DeploymentOutcome {
        // Absolute, so it still resolves once the working directory changes
        let script = match tokio::fs::canonicalize(&self.script).await {
            Ok(path) if is_file(&path).await => path,
            _ => {
                return DeploymentOutcome::LaunchFailed {
                    reason: format!("deployment script {:?} not found", self.script),
                };
            }
        };

        info!(
            "Running (cwd = {:?}): {} {} for branch '{}'",
            self.working_dir,
            self.interpreter,
            script.display(),
            branch
        );

        let mut command = Command::new(&self.interpreter);
        command
            .arg(&script)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down everything the script started
        #[cfg(unix)]
        command.process_group(0);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return DeploymentOutcome::LaunchFailed {
                    reason: format!("{} failed to start: {}", self.interpreter, e),
                };
            }
        };
        let pid = child.id();

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => {
                    kill_process_group(pid);
                    return DeploymentOutcome::TimedOut { after: limit };
                }
            },
            None => child.wait_with_output().await,
        };

        match output {
            Ok(output) => DeploymentOutcome::from_output(output),
            Err(e) => DeploymentOutcome::LaunchFailed {
                reason: format!("waiting for {} failed: {}", self.interpreter, e),
            },
        }
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// SIGKILLs the process group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    // SAFETY: killpg takes plain integers and touches no memory
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        warn!(
            "Failed to kill process group {}: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[async_trait]
impl Deployer for ScriptDeployer {
    async fn run(&self, branch: &str) -> DeploymentOutcome {
        // Only one deployment at a time when serialized; later pushes wait their turn
        let _guard = match &self.run_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        self.execute(branch).await
    }
}

/// Hands a deployment for `branch` to a detached task and returns at once.
///
/// The handle is only useful to tests; the webhook path drops it.
pub fn spawn_deployment(deployer: Arc<dyn Deployer>, branch: String) -> JoinHandle<()> {
    let run_id = Uuid::now_v7();
    info!(%run_id, "Deployment queued for branch '{}'", branch);

    tokio::spawn(async move {
        let queued_at = Instant::now();
        let outcome = deployer.run(&branch).await;
        outcome.log(run_id, &branch);
        debug!(
            %run_id,
            duration_ms = queued_at.elapsed().as_millis() as u64,
            "Deployment task finished"
        );
    })
}
