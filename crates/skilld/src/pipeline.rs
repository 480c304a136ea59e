//! Install pipeline.
//!
//! `install` runs stop-if-running -> fetch/update -> record -> start for one
//! package. Stop and record are best-effort; fetch and start failures end
//! the pipeline. Work on the same process name is never interleaved: a
//! second request for a name already in flight is rejected.

use skill_core::events::{InstallEvent, SkillUninstalledPayload};
use skill_core::InstalledRecord;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::packages::PackageInstaller;
use crate::storage::InstallLog;
use crate::supervisor::{Supervisor, SupervisorError};
use crate::BestEffort;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to install {package}: {reason}")]
    InstallFailed { package: String, reason: String },
    #[error("failed to start {name}: {reason}")]
    StartFailed { name: String, reason: String },
    #[error("an install or removal of {0} is already in progress")]
    InstallInProgress(String),
    #[error("{0} is not an installed user skill")]
    NotInstalled(String),
    #[error("failed to remove {name}: {reason}")]
    RemoveFailed { name: String, reason: String },
    #[error("skill manager is shutting down, {0} was not started")]
    ShuttingDown(String),
}

pub type Result<T> = std::result::Result<T, InstallError>;

/// Receives human-readable progress messages.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, message: &str);
}

/// Writes progress to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn notify(&self, message: &str) {
        info!(progress = %message);
    }
}

impl ProgressSink for UnboundedSender<String> {
    fn notify(&self, message: &str) {
        // The receiver going away only means nobody is listening anymore.
        let _ = self.send(message.to_string());
    }
}

/// Marks a process name as busy until dropped.
struct InFlight<'a> {
    names: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

/// Installs, upgrades and removes skills.
pub struct Installer {
    supervisor: Arc<Supervisor>,
    packages: Arc<dyn PackageInstaller>,
    history: Arc<dyn InstallLog>,
    skills_dir: PathBuf,
    in_flight: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("skills_dir", &self.skills_dir)
            .finish_non_exhaustive()
    }
}

impl Installer {
    pub fn new(
        supervisor: Arc<Supervisor>,
        packages: Arc<dyn PackageInstaller>,
        history: Arc<dyn InstallLog>,
        skills_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            supervisor,
            packages,
            history,
            skills_dir: skills_dir.into(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, name: &str) -> Result<InFlight<'_>> {
        let mut names = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !names.insert(name.to_string()) {
            return Err(InstallError::InstallInProgress(name.to_string()));
        }
        Ok(InFlight {
            names: &self.in_flight,
            name: name.to_string(),
        })
    }

    /// Install or upgrade `package` and (re)start it.
    ///
    /// Returns the directory the package was installed into.
    pub async fn install(&self, package: &str, sink: &dyn ProgressSink) -> Result<PathBuf> {
        let normalized =
            self.packages
                .normalize(package)
                .map_err(|e| InstallError::InstallFailed {
                    package: package.to_string(),
                    reason: e.to_string(),
                })?;
        let name = normalized.name;
        let _guard = self.claim(&name)?;
        if self.supervisor.is_closed() {
            return Err(InstallError::ShuttingDown(name));
        }

        if let BestEffort::Failed(reason) = self.stop_existing(&name).await {
            sink.notify(&format!("Could not stop running {name}: {reason}"));
        }

        sink.notify(&format!("Installing {package}..."));
        let path = match self.packages.install(package, &self.skills_dir).await {
            Ok(path) => path,
            Err(e) => {
                warn!(%package, error = %e, "package install failed");
                return Err(InstallError::InstallFailed {
                    package: package.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let record = InstallEvent::SkillInstalled(InstalledRecord::new(package, &path));
        if let BestEffort::Failed(reason) = self.record(&record).await {
            warn!(%package, %reason, "install not recorded");
        }

        sink.notify(&format!("Starting {package}..."));
        self.supervisor
            .start(&name, &path)
            .await
            .map_err(|e| match e {
                SupervisorError::Closed(name) => InstallError::ShuttingDown(name),
                other => InstallError::StartFailed {
                    name: name.clone(),
                    reason: other.to_string(),
                },
            })?;

        sink.notify(&format!("{package} installed and started"));
        info!(%package, %name, path = %path.display(), "skill installed");
        Ok(path)
    }

    /// Stop a user skill and delete its directory.
    pub async fn uninstall(&self, name: &str, sink: &dyn ProgressSink) -> Result<()> {
        let dir = self.user_skill_dir(name)?;
        let _guard = self.claim(name)?;

        if let BestEffort::Failed(reason) = self.stop_existing(name).await {
            sink.notify(&format!("Could not stop running {name}: {reason}"));
        }

        sink.notify(&format!("Removing {name}..."));
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| InstallError::RemoveFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let event = InstallEvent::SkillUninstalled(SkillUninstalledPayload::new(name));
        if let BestEffort::Failed(reason) = self.record(&event).await {
            warn!(%name, %reason, "removal not recorded");
        }

        sink.notify(&format!("{name} removed"));
        info!(%name, "skill removed");
        Ok(())
    }

    /// Directory of an installed user skill. Only plain names that exist
    /// directly under the skills root are accepted.
    fn user_skill_dir(&self, name: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        let plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        let dir = self.skills_dir.join(name);
        if !plain || !dir.is_dir() {
            return Err(InstallError::NotInstalled(name.to_string()));
        }
        Ok(dir)
    }

    async fn stop_existing(&self, name: &str) -> BestEffort {
        match self.supervisor.stop(name).await {
            Ok(_) => BestEffort::Done,
            Err(e) => {
                warn!(%name, error = %e, "failed to stop running skill, continuing");
                BestEffort::Failed(e.to_string())
            }
        }
    }

    async fn record(&self, event: &InstallEvent) -> BestEffort {
        match self.history.record(event).await {
            Ok(()) => BestEffort::Done,
            Err(e) => BestEffort::Failed(e.to_string()),
        }
    }
}
