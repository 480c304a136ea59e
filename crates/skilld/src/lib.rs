//! skilld - Skill manager daemon
//!
//! Library components for the daemon process.

pub mod bus;
pub mod gateway;
pub mod packages;
pub mod pipeline;
pub mod reconcile;
pub mod server;
pub mod storage;
pub mod supervisor;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use bus::{Bus, BusError, HttpBus};
use gateway::Gateway;
use packages::{GitInstaller, PackageInstaller};
use pipeline::Installer;
use reconcile::{reconcile, Reconciliation};
use skill_core::config::InstallLogMode;
use skill_core::Config;
use storage::{BusInstallLog, InstallLog, SqliteInstallLog, StorageError};
use supervisor::{LocalBackend, ProcessBackend, Supervisor};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long shutdown waits for in-flight chat requests.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Outcome of an operation whose failure is logged and otherwise ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestEffort {
    Done,
    Failed(String),
}

impl BestEffort {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to open install log: {0}")]
    Storage(#[from] StorageError),
    #[error("failed to create bus client: {0}")]
    Bus(#[from] BusError),
    #[error("failed to bind bus endpoint on port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },
    #[error("bus endpoint failed: {0}")]
    Serve(std::io::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;

/// Daemon state.
#[derive(Debug)]
pub struct Daemon {
    config: Config,
    supervisor: Arc<Supervisor>,
    gateway: Arc<Gateway>,
}

impl Daemon {
    /// Create a daemon with production collaborators.
    pub async fn new(config: Config) -> Result<Self> {
        let bus: Arc<dyn Bus> = Arc::new(HttpBus::new(config.peers.clone())?);

        let history: Arc<dyn InstallLog> = match config.install_log {
            InstallLogMode::Sqlite => {
                let log = SqliteInstallLog::new(&config.db_path).await?;
                log.migrate_embedded().await?;
                info!("install log: {}", config.db_path.display());
                Arc::new(log)
            }
            InstallLogMode::Bus => {
                info!("install log: {}", config.store_service_key);
                Arc::new(BusInstallLog::new(
                    Arc::clone(&bus),
                    config.store_service_key.clone(),
                ))
            }
        };

        let packages = Arc::new(GitInstaller::new(config.git_host.clone()));
        Ok(Self::with_parts(
            config,
            Arc::new(LocalBackend::new()),
            packages,
            history,
            bus,
        ))
    }

    /// Create a daemon from explicit collaborators.
    pub fn with_parts(
        config: Config,
        backend: Arc<dyn ProcessBackend>,
        packages: Arc<dyn PackageInstaller>,
        history: Arc<dyn InstallLog>,
        bus: Arc<dyn Bus>,
    ) -> Self {
        let supervisor = Arc::new(Supervisor::new(
            backend,
            config.logs_dir.clone(),
            config.entry_command.clone(),
        ));
        let installer = Arc::new(Installer::new(
            Arc::clone(&supervisor),
            packages,
            history,
            config.skills_dir.clone(),
        ));
        let gateway = Arc::new(Gateway::new(
            &config,
            installer,
            Arc::clone(&supervisor),
            bus,
        ));
        Self {
            config,
            supervisor,
            gateway,
        }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Start every skill found on disk. Returns how many started.
    pub async fn start_skills(&self) -> usize {
        let Reconciliation { skills, errors } =
            reconcile(&self.config.core_skills_dir, &self.config.skills_dir).await;

        for e in &errors {
            warn!(error = %e, "skipping skill directory");
        }

        let mut started = 0;
        for skill in &skills {
            match self.supervisor.start(&skill.name, &skill.source_path).await {
                Ok(_) => started += 1,
                Err(e) => error!(
                    name = %skill.name,
                    origin = skill.origin.as_str(),
                    error = %e,
                    "failed to start skill"
                ),
            }
        }
        info!("started {} of {} skill(s)", started, skills.len());
        started
    }

    /// Boot the skills, then serve the bus endpoint until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("skilld starting on port {}", self.config.port);
        info!("skills: {}", self.config.skills_dir.display());
        info!("core skills: {}", self.config.core_skills_dir.display());

        self.start_skills().await;

        let port = self.config.port;
        let listener = server::bind(port)
            .await
            .map_err(|source| DaemonError::Bind { port, source })?;

        if self.config.announce {
            // Not awaited: the relay may come up after us.
            drop(self.gateway.announce());
        }

        let router = server::create_router(Arc::clone(&self.gateway));
        server::serve(listener, router, shutdown)
            .await
            .map_err(DaemonError::Serve)
    }

    /// Stop every supervised skill. No skill starts once this begins.
    pub async fn shutdown(&self) {
        info!("shutdown requested");
        self.supervisor.close().await;
        if tokio::time::timeout(SHUTDOWN_GRACE, self.gateway.wait_idle())
            .await
            .is_err()
        {
            warn!("chat requests still running, stopping skills anyway");
        }

        let outcomes = self.supervisor.stop_all().await;
        let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
        info!("stopped {} skill(s), {} failure(s)", outcomes.len(), failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, FakeInstaller, MemoryInstallLog, RecordingBus};
    use skill_core::protocol::COMMUNICATION_SERVICE_KEY;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct TestDaemon {
        daemon: Daemon,
        backend: Arc<FakeBackend>,
        packages: Arc<FakeInstaller>,
        bus: Arc<RecordingBus>,
        dir: TempDir,
    }

    fn mkdirs(root: &Path, names: &[&str]) {
        for name in names {
            std::fs::create_dir_all(root.join(name)).unwrap();
        }
    }

    fn create_test_daemon(port: u16) -> TestDaemon {
        let dir = TempDir::new().unwrap();
        let config = Config {
            skills_dir: dir.path().join("skills"),
            core_skills_dir: dir.path().join("core"),
            logs_dir: dir.path().join("logs"),
            port,
            ..Default::default()
        };
        let backend = Arc::new(FakeBackend::default());
        let packages = Arc::new(FakeInstaller::default());
        let bus = Arc::new(RecordingBus::default());
        let daemon = Daemon::with_parts(
            config,
            Arc::clone(&backend) as _,
            Arc::clone(&packages) as _,
            Arc::new(MemoryInstallLog::default()),
            Arc::clone(&bus) as _,
        );
        TestDaemon {
            daemon,
            backend,
            packages,
            bus,
            dir,
        }
    }

    #[tokio::test]
    async fn boot_starts_core_and_user_skills() {
        let t = create_test_daemon(0);
        mkdirs(&t.dir.path().join("core"), &["alpha", "beta"]);
        mkdirs(&t.dir.path().join("skills"), &["beta", "gamma"]);

        let started = t.daemon.start_skills().await;

        assert_eq!(started, 3);
        let mut cwds: Vec<(String, PathBuf)> = t
            .backend
            .started_specs()
            .into_iter()
            .map(|s| (s.name, s.cwd))
            .collect();
        cwds.sort();
        assert_eq!(
            cwds,
            vec![
                ("alpha".to_string(), t.dir.path().join("core/alpha")),
                ("beta".to_string(), t.dir.path().join("skills/beta")),
                ("gamma".to_string(), t.dir.path().join("skills/gamma")),
            ]
        );
    }

    #[tokio::test]
    async fn boot_continues_past_failures() {
        let t = create_test_daemon(0);
        // No core directory at all.
        mkdirs(&t.dir.path().join("skills"), &["good", "bad"]);
        t.backend.fail_start("bad");

        let started = t.daemon.start_skills().await;

        assert_eq!(started, 1);
        assert!(t.daemon.supervisor().is_running("good").await);
    }

    #[tokio::test]
    async fn shutdown_stops_every_skill() {
        let t = create_test_daemon(0);
        mkdirs(&t.dir.path().join("skills"), &["a", "b", "c"]);
        t.daemon.start_skills().await;

        t.daemon.shutdown().await;

        let mut stopped = t.backend.stopped_names();
        stopped.sort();
        assert_eq!(stopped, vec!["a", "b", "c"]);
        assert!(t.daemon.supervisor().running().await.is_empty());
    }

    #[tokio::test]
    async fn install_in_flight_at_shutdown_is_not_started() {
        let t = create_test_daemon(0);
        t.packages.set_delay(Duration::from_millis(200));

        let gateway = Arc::clone(t.daemon.gateway());
        let add = tokio::spawn(async move { gateway.add(Some("acme/greeter".into())).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        t.daemon.shutdown().await;
        let result = add.await.unwrap();

        assert!(matches!(
            result,
            Err(crate::gateway::GatewayError::Install(
                crate::pipeline::InstallError::ShuttingDown(_)
            ))
        ));
        assert!(t.daemon.supervisor().running().await.is_empty());
        assert!(t.backend.started_specs().is_empty());
    }

    #[tokio::test]
    async fn run_returns_when_cancelled_and_announces() {
        let t = create_test_daemon(0);
        mkdirs(&t.dir.path().join("core"), &["alpha"]);
        let token = CancellationToken::new();
        token.cancel();

        t.daemon.run(token).await.unwrap();

        assert!(t.daemon.supervisor().is_running("alpha").await);
        for _ in 0..100 {
            if !t.bus.sent_to(COMMUNICATION_SERVICE_KEY).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let sent = t.bus.sent_to(COMMUNICATION_SERVICE_KEY);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "register-msg-handler");
    }

    #[tokio::test]
    async fn bind_failure_is_fatal() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let t = create_test_daemon(port);

        let err = t.daemon.run(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, DaemonError::Bind { port: p, .. } if p == port));
        assert!(t.bus.sent().is_empty());
    }
}
