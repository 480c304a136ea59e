//! Process supervision for skill workers.
//!
//! [`Supervisor`] owns the name -> process map and is the only place that
//! mutates it. The OS-level work happens in a [`ProcessBackend`];
//! [`LocalBackend`] runs skills as child processes of the daemon with their
//! combined output appended to `<logs_dir>/<name>.log`.

use async_trait::async_trait;
use chrono::Utc;
use skill_core::SupervisedProcess;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to spawn process: {0}")]
    Spawn(std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no such process: {0}")]
    NotFound(String),
    #[error("process already running: {0}")]
    AlreadyRunning(String),
    #[error("empty entry command")]
    EmptyCommand,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{0} is already running")]
    AlreadyRunning(String),
    #[error("not starting {0}: shutting down")]
    Closed(String),
    #[error("failed to start {name}: {reason}")]
    StartFailed { name: String, reason: String },
    #[error("failed to stop {name}: {source}")]
    StopFailed {
        name: String,
        #[source]
        source: BackendError,
    },
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

/// What the backend needs to launch a skill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub name: String,
    pub cwd: PathBuf,
    pub log_file: PathBuf,
    /// Program followed by its arguments.
    pub command: Vec<String>,
}

/// A process the backend reports as alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningProcess {
    pub name: String,
    pub pid: Option<u32>,
}

/// OS-level process control keyed by process name.
#[async_trait]
pub trait ProcessBackend: Send + Sync {
    /// Launch a process, returning its pid when known.
    async fn start(&self, spec: &ProcessSpec) -> std::result::Result<Option<u32>, BackendError>;

    /// Terminate a process.
    async fn stop(&self, name: &str) -> std::result::Result<(), BackendError>;

    /// Processes that are currently alive.
    async fn list_running(&self) -> std::result::Result<Vec<RunningProcess>, BackendError>;
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// Nothing was registered under the name.
    NotRunning,
}

/// Supervises skill processes by name.
pub struct Supervisor {
    backend: Arc<dyn ProcessBackend>,
    logs_dir: PathBuf,
    entry_command: Vec<String>,
    processes: Mutex<HashMap<String, SupervisedProcess>>,
    /// Only written with `processes` locked.
    closed: AtomicBool,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("logs_dir", &self.logs_dir)
            .field("entry_command", &self.entry_command)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(
        backend: Arc<dyn ProcessBackend>,
        logs_dir: impl Into<PathBuf>,
        entry_command: Vec<String>,
    ) -> Self {
        Self {
            backend,
            logs_dir: logs_dir.into(),
            entry_command,
            processes: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Log file for a skill.
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.logs_dir.join(format!("{name}.log"))
    }

    /// Start a skill from `working_directory`.
    ///
    /// Fails with `AlreadyRunning` if `name` is registered and still alive;
    /// callers must stop it first.
    pub async fn start(&self, name: &str, working_directory: &Path) -> Result<SupervisedProcess> {
        let mut processes = self.processes.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(SupervisorError::Closed(name.to_string()));
        }
        self.prune_exited(&mut processes).await;

        if processes.contains_key(name) {
            return Err(SupervisorError::AlreadyRunning(name.to_string()));
        }

        let spec = ProcessSpec {
            name: name.to_string(),
            cwd: working_directory.to_path_buf(),
            log_file: self.log_path(name),
            command: self.entry_command.clone(),
        };

        let pid = self
            .backend
            .start(&spec)
            .await
            .map_err(|e| SupervisorError::StartFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let process = SupervisedProcess {
            name: spec.name,
            working_directory: spec.cwd,
            log_path: spec.log_file,
            pid,
        };
        info!(
            name = %process.name,
            pid = ?process.pid,
            cwd = %process.working_directory.display(),
            "started skill"
        );
        processes.insert(name.to_string(), process.clone());
        Ok(process)
    }

    /// Stop a skill. Unknown names are a no-op.
    ///
    /// The bookkeeping entry is removed even when the backend fails to
    /// terminate the process.
    pub async fn stop(&self, name: &str) -> Result<StopOutcome> {
        let mut processes = self.processes.lock().await;
        if processes.remove(name).is_none() {
            debug!(%name, "stop requested for unknown skill");
            return Ok(StopOutcome::NotRunning);
        }

        match self.backend.stop(name).await {
            Ok(()) => {
                info!(%name, "stopped skill");
                Ok(StopOutcome::Stopped)
            }
            Err(BackendError::NotFound(_)) => {
                debug!(%name, "skill had already exited");
                Ok(StopOutcome::Stopped)
            }
            Err(source) => Err(SupervisorError::StopFailed {
                name: name.to_string(),
                source,
            }),
        }
    }

    /// Refuse every later `start`. A start already holding the map finishes
    /// first, so a following `stop_all` sees it.
    pub async fn close(&self) {
        let _processes = self.processes.lock().await;
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether `name` is currently registered.
    pub async fn is_running(&self, name: &str) -> bool {
        self.processes.lock().await.contains_key(name)
    }

    /// Snapshot of supervised processes, dropping ones that have exited.
    pub async fn running(&self) -> Vec<SupervisedProcess> {
        let mut processes = self.processes.lock().await;
        self.prune_exited(&mut processes).await;
        let mut list: Vec<SupervisedProcess> = processes.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Visit every supervised process.
    pub async fn for_each_running<F>(&self, mut visit: F)
    where
        F: FnMut(&SupervisedProcess),
    {
        for process in self.running().await {
            visit(&process);
        }
    }

    /// Stop every supervised process, returning the outcome per name.
    pub async fn stop_all(&self) -> Vec<(String, Result<StopOutcome>)> {
        let mut names = Vec::new();
        self.for_each_running(|p| names.push(p.name.clone())).await;

        let mut outcomes = Vec::with_capacity(names.len());
        for name in names {
            let outcome = self.stop(&name).await;
            if let Err(e) = &outcome {
                warn!(%name, error = %e, "failed to stop skill during shutdown");
            }
            outcomes.push((name, outcome));
        }
        outcomes
    }

    async fn prune_exited(&self, processes: &mut HashMap<String, SupervisedProcess>) {
        if processes.is_empty() {
            return;
        }
        match self.backend.list_running().await {
            Ok(alive) => processes.retain(|name, _| {
                let keep = alive.iter().any(|p| &p.name == name);
                if !keep {
                    warn!(%name, "skill exited");
                }
                keep
            }),
            Err(e) => warn!(error = %e, "failed to list running processes"),
        }
    }
}

/// Runs skills as direct children of the daemon.
#[derive(Debug, Default)]
pub struct LocalBackend {
    children: Mutex<HashMap<String, Child>>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_log(path: &Path) -> std::io::Result<std::fs::File> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
    }
}

#[async_trait]
impl ProcessBackend for LocalBackend {
    async fn start(&self, spec: &ProcessSpec) -> std::result::Result<Option<u32>, BackendError> {
        let (program, args) = spec
            .command
            .split_first()
            .ok_or(BackendError::EmptyCommand)?;

        let mut children = self.children.lock().await;
        if let Some(child) = children.get_mut(&spec.name) {
            if child.try_wait()?.is_none() {
                return Err(BackendError::AlreadyRunning(spec.name.clone()));
            }
        }

        let mut log = Self::open_log(&spec.log_file)?;
        writeln!(
            log,
            "--- starting {} in {} at {} ---",
            spec.name,
            spec.cwd.display(),
            Utc::now().to_rfc3339()
        )?;
        let stderr_log = log.try_clone()?;

        let child = Command::new(program)
            .args(args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr_log))
            .kill_on_drop(true)
            .spawn()
            .map_err(BackendError::Spawn)?;

        let pid = child.id();
        children.insert(spec.name.clone(), child);
        Ok(pid)
    }

    async fn stop(&self, name: &str) -> std::result::Result<(), BackendError> {
        let mut child = self
            .children
            .lock()
            .await
            .remove(name)
            .ok_or_else(|| BackendError::NotFound(name.to_string()))?;

        if child.try_wait()?.is_some() {
            return Err(BackendError::NotFound(name.to_string()));
        }
        child.kill().await?;
        Ok(())
    }

    async fn list_running(&self) -> std::result::Result<Vec<RunningProcess>, BackendError> {
        let mut children = self.children.lock().await;
        let mut running = Vec::new();
        let mut exited = Vec::new();

        for (name, child) in children.iter_mut() {
            match child.try_wait() {
                Ok(None) => running.push(RunningProcess {
                    name: name.clone(),
                    pid: child.id(),
                }),
                Ok(Some(status)) => {
                    debug!(%name, %status, "child exited");
                    exited.push(name.clone());
                }
                Err(e) => {
                    warn!(%name, error = %e, "failed to poll child");
                    exited.push(name.clone());
                }
            }
        }

        for name in exited {
            children.remove(&name);
        }
        Ok(running)
    }
}
