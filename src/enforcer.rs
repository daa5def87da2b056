//! Enforcement backends.
//!
//! The guard only decides *when* to restrict a process; the restriction
//! itself is delegated to an external command (by default a cgroup helper
//! script). In dry-run mode the intended invocations are logged and recorded
//! instead of executed.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::Config;
use crate::policy::Action;

#[derive(Debug, Error)]
pub enum EnforceError {
    #[error("enforcer program '{0}' not found")]
    NotFound(String),

    #[error("failed to run enforcer: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("enforcer '{verb}' exited with {status}: {stderr}")]
    Failed {
        verb: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("enforcer '{verb}' timed out after {timeout:?}")]
    Timeout { verb: String, timeout: Duration },
}

#[async_trait]
pub trait EnforcementSink: Send + Sync {
    /// Prepares the enforcement mechanism. Must be idempotent.
    async fn setup(&self) -> Result<(), EnforceError>;

    /// Carries out `action` for `pid`. `Ignore` is a no-op.
    async fn apply(&self, pid: u32, action: Action) -> Result<(), EnforceError>;
}

/// Builds the argument vector `<program> <script> <verb> [pid]`.
fn command_line(program: &str, script: &Path, verb: &str, pid: Option<u32>) -> Vec<String> {
    let mut args = vec![
        program.to_string(),
        script.to_string_lossy().into_owned(),
        verb.to_string(),
    ];
    if let Some(pid) = pid {
        args.push(pid.to_string());
    }
    args
}

/// Runs the external helper, e.g. `bash ./cgroup_limiter.sh limit 1234`.
#[derive(Debug, Clone)]
pub struct CommandEnforcer {
    program: String,
    script: PathBuf,
    timeout: Duration,
}

impl CommandEnforcer {
    pub fn new(program: impl Into<String>, script: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
            timeout,
        }
    }

    async fn run(&self, verb: &str, pid: Option<u32>) -> Result<(), EnforceError> {
        let argv = command_line(&self.program, &self.script, verb, pid);
        debug!("Executing: {}", argv.join(" "));

        let child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(EnforceError::NotFound(self.program.clone()))
            }
            Ok(Err(e)) => return Err(EnforceError::Spawn(e)),
            Err(_) => {
                return Err(EnforceError::Timeout {
                    verb: verb.to_string(),
                    timeout: self.timeout,
                })
            }
        };

        if output.status.success() {
            Ok(())
        } else {
            Err(EnforceError::Failed {
                verb: verb.to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl EnforcementSink for CommandEnforcer {
    async fn setup(&self) -> Result<(), EnforceError> {
        self.run("setup", None).await
    }

    async fn apply(&self, pid: u32, action: Action) -> Result<(), EnforceError> {
        match action {
            Action::Ignore => Ok(()),
            Action::Throttle => self.run(action.verb(), Some(pid)).await,
        }
    }
}

/// One intended enforcer invocation recorded in dry-run mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementCall {
    pub verb: String,
    pub pid: Option<u32>,
}

/// Logs and records invocations without executing anything.
#[derive(Debug)]
pub struct DryRunEnforcer {
    program: String,
    script: PathBuf,
    calls: Mutex<Vec<EnforcementCall>>,
}

impl DryRunEnforcer {
    pub fn new(program: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call recorded so far, in order.
    pub fn calls(&self) -> Vec<EnforcementCall> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, verb: &str, pid: Option<u32>) {
        let argv = command_line(&self.program, &self.script, verb, pid);
        info!("[dry-run] Executing: {}", argv.join(" "));
        let call = EnforcementCall {
            verb: verb.to_string(),
            pid,
        };
        match self.calls.lock() {
            Ok(mut calls) => calls.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
    }
}

impl Default for DryRunEnforcer {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_ENFORCER_PROGRAM,
            crate::config::DEFAULT_ENFORCER_SCRIPT,
        )
    }
}

#[async_trait]
impl EnforcementSink for DryRunEnforcer {
    async fn setup(&self) -> Result<(), EnforceError> {
        self.record("setup", None);
        Ok(())
    }

    async fn apply(&self, pid: u32, action: Action) -> Result<(), EnforceError> {
        if action == Action::Throttle {
            self.record(action.verb(), Some(pid));
        }
        Ok(())
    }
}

/// Whether the guard runs with root privileges (cgroup writes need them).
#[cfg(unix)]
pub fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn running_as_root() -> bool {
    false
}

/// Whether this host can run the cgroup enforcer at all.
pub const ENFORCEMENT_SUPPORTED: bool = cfg!(target_os = "linux");

/// Dry-run is forced on hosts without cgroup v2 (anything but Linux).
pub fn effective_dry_run(config: &Config) -> bool {
    config.dry_run() || !ENFORCEMENT_SUPPORTED
}

/// Selects the enforcement backend for `config`.
pub fn enforcer_from_config(config: &Config) -> Arc<dyn EnforcementSink> {
    let program = config.enforcer_program().to_string();
    let script = config.enforcer_script();

    if effective_dry_run(config) {
        info!("Dry-run mode: enforcer calls will be printed, not executed");
        Arc::new(DryRunEnforcer::new(program, script))
    } else {
        Arc::new(CommandEnforcer::new(program, script, config.enforcer_timeout()))
    }
}
