//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use skill_core::events::InstallEvent;
use skill_core::NormalizedPackage;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::bus::{Bus, BusError};
use crate::packages::{normalize_identifier, PackageError, PackageInstaller};
use crate::pipeline::ProgressSink;
use crate::storage::{InstallLog, StorageError};
use crate::supervisor::{BackendError, ProcessBackend, ProcessSpec, RunningProcess};

#[derive(Debug, Default)]
struct BackendState {
    running: HashMap<String, u32>,
    calls: Vec<String>,
    started: Vec<ProcessSpec>,
    fail_start: HashSet<String>,
    fail_stop: HashSet<String>,
    next_pid: u32,
}

/// Process backend that only keeps bookkeeping.
#[derive(Debug, Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn started_specs(&self) -> Vec<ProcessSpec> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn stopped_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("stop:").map(str::to_string))
            .collect()
    }

    pub fn fail_start(&self, name: &str) {
        self.state.lock().unwrap().fail_start.insert(name.to_string());
    }

    pub fn fail_stop(&self, name: &str) {
        self.state.lock().unwrap().fail_stop.insert(name.to_string());
    }

    /// Pretend the process crashed.
    pub fn simulate_exit(&self, name: &str) {
        self.state.lock().unwrap().running.remove(name);
    }
}

#[async_trait]
impl ProcessBackend for FakeBackend {
    async fn start(&self, spec: &ProcessSpec) -> Result<Option<u32>, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("start:{}", spec.name));
        if state.fail_start.contains(&spec.name) {
            return Err(BackendError::Spawn(std::io::Error::other("spawn refused")));
        }
        state.next_pid += 1;
        let pid = 1000 + state.next_pid;
        state.running.insert(spec.name.clone(), pid);
        state.started.push(spec.clone());
        Ok(Some(pid))
    }

    async fn stop(&self, name: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("stop:{name}"));
        if state.fail_stop.contains(name) {
            return Err(BackendError::Io(std::io::Error::other("kill refused")));
        }
        state
            .running
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(name.to_string()))
    }

    async fn list_running(&self) -> Result<Vec<RunningProcess>, BackendError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .running
            .iter()
            .map(|(name, pid)| RunningProcess {
                name: name.clone(),
                pid: Some(*pid),
            })
            .collect())
    }
}

#[derive(Debug, Default)]
struct InstallerState {
    installs: Vec<String>,
    failure: Option<String>,
    delay: Option<Duration>,
}

/// Package installer that resolves identifiers without touching disk.
#[derive(Debug, Default)]
pub struct FakeInstaller {
    state: Mutex<InstallerState>,
}

impl FakeInstaller {
    pub fn installs(&self) -> Vec<String> {
        self.state.lock().unwrap().installs.clone()
    }

    pub fn fail_with(&self, reason: &str) {
        self.state.lock().unwrap().failure = Some(reason.to_string());
    }

    pub fn succeed(&self) {
        self.state.lock().unwrap().failure = None;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }
}

#[async_trait]
impl PackageInstaller for FakeInstaller {
    fn normalize(&self, identifier: &str) -> Result<NormalizedPackage, PackageError> {
        normalize_identifier(identifier)
    }

    async fn install(&self, identifier: &str, destination_root: &Path) -> Result<PathBuf, PackageError> {
        let package = self.normalize(identifier)?;
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.installs.push(identifier.to_string());
            if let Some(reason) = &state.failure {
                return Err(PackageError::CommandFailed {
                    action: "clone",
                    message: reason.clone(),
                });
            }
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(destination_root.join(package.name))
    }

    async fn update(&self, _local_path: &Path) -> Result<(), PackageError> {
        Ok(())
    }
}

/// Install log kept in memory.
#[derive(Debug, Default)]
pub struct MemoryInstallLog {
    events: Mutex<Vec<InstallEvent>>,
    failing: Mutex<bool>,
}

impl MemoryInstallLog {
    pub fn events(&self) -> Vec<InstallEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn fail(&self) {
        *self.failing.lock().unwrap() = true;
    }
}

#[async_trait]
impl InstallLog for MemoryInstallLog {
    async fn record(&self, event: &InstallEvent) -> Result<(), StorageError> {
        if *self.failing.lock().unwrap() {
            return Err(StorageError::Bus(BusError::Transport("store offline".into())));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Bus that records every request and answers `{ "ok": true }`.
#[derive(Debug, Default)]
pub struct RecordingBus {
    sent: Mutex<Vec<(String, Value)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingBus {
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }

    /// Messages sent to `service`.
    pub fn sent_to(&self, service: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|(s, _)| s == service)
            .map(|(_, m)| m)
            .collect()
    }

    pub fn fail_service(&self, service: &str) {
        self.failing.lock().unwrap().insert(service.to_string());
    }
}

#[async_trait]
impl Bus for RecordingBus {
    async fn request(&self, service: &str, message: Value) -> Result<Value, BusError> {
        self.sent
            .lock()
            .unwrap()
            .push((service.to_string(), message));
        if self.failing.lock().unwrap().contains(service) {
            return Err(BusError::Transport(format!("{service} unreachable")));
        }
        Ok(json!({ "ok": true }))
    }
}

/// Progress sink that keeps every message.
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
