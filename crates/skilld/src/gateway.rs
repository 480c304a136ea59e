//! Bus gateway.
//!
//! Turns requests addressed to the skill service into pipeline calls and
//! pipeline results into replies. Chat commands are acknowledged right away;
//! their progress is relayed back to the conversation through the
//! communication service.

use serde_json::{json, Value};
use skill_core::command::{parse_command, Command};
use skill_core::protocol::{BusResponse, CommandHelp, ProcessInfo, RelayMessage, SkillRequest};
use skill_core::{Config, InstallRequest};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::bus::{self, Bus};
use crate::pipeline::{InstallError, Installer, ProgressSink, TracingSink};
use crate::supervisor::Supervisor;
use crate::BestEffort;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no skill package found")]
    MissingPackage,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Install(#[from] InstallError),
}

/// How the gateway answers a bus request.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayReply {
    Respond(BusResponse),
    /// Not ours; another handler may claim the message.
    Declined,
}

impl GatewayReply {
    fn from_result(result: Result<Value, GatewayError>) -> Self {
        match result {
            Ok(value) => Self::Respond(BusResponse::ok(value)),
            Err(e) => Self::Respond(BusResponse::err(e.to_string())),
        }
    }
}

enum ChatJob {
    Install(InstallRequest),
    Uninstall { name: String, reply_to: Value },
}

impl ChatJob {
    fn reply_to(&self) -> &Value {
        match self {
            Self::Install(request) => &request.reply_to,
            Self::Uninstall { reply_to, .. } => reply_to,
        }
    }
}

/// Responder for the skill service key.
pub struct Gateway {
    service_key: String,
    relay_service_key: String,
    installer: Arc<Installer>,
    supervisor: Arc<Supervisor>,
    bus: Arc<dyn Bus>,
    tasks: TaskTracker,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("service_key", &self.service_key)
            .field("relay_service_key", &self.relay_service_key)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(
        config: &Config,
        installer: Arc<Installer>,
        supervisor: Arc<Supervisor>,
        bus: Arc<dyn Bus>,
    ) -> Self {
        Self {
            service_key: config.service_key.clone(),
            relay_service_key: config.relay_service_key.clone(),
            installer,
            supervisor,
            bus,
            tasks: TaskTracker::new(),
        }
    }

    pub fn service_key(&self) -> &str {
        &self.service_key
    }

    /// Dispatch a raw bus message on its `type`.
    pub async fn handle(&self, message: Value) -> GatewayReply {
        let request = match serde_json::from_value::<SkillRequest>(message) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "rejecting malformed request");
                return GatewayReply::from_result(Err(GatewayError::InvalidRequest(
                    e.to_string(),
                )));
            }
        };

        match request {
            SkillRequest::Add { pkg } => GatewayReply::from_result(
                self.add(pkg)
                    .await
                    .map(|path| json!({ "path": path.display().to_string() })),
            ),
            SkillRequest::Msg { msg, addl } => self.on_chat(msg.as_deref().unwrap_or(""), addl),
            SkillRequest::Remove { name } => GatewayReply::from_result(
                self.remove(name).await.map(|name| json!({ "removed": name })),
            ),
            SkillRequest::List => {
                let list = self.list().await;
                GatewayReply::from_result(
                    serde_json::to_value(list)
                        .map_err(|e| GatewayError::InvalidRequest(e.to_string())),
                )
            }
        }
    }

    /// Install a package on behalf of a bus requester.
    pub async fn add(&self, pkg: Option<String>) -> Result<PathBuf, GatewayError> {
        let package = pkg
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or(GatewayError::MissingPackage)?;

        info!(%package, "install requested");
        Ok(self.installer.install(&package, &TracingSink).await?)
    }

    /// Uninstall a user skill on behalf of a bus requester.
    pub async fn remove(&self, name: Option<String>) -> Result<String, GatewayError> {
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or(GatewayError::MissingPackage)?;
        self.installer.uninstall(&name, &TracingSink).await?;
        Ok(name)
    }

    /// Supervised processes.
    pub async fn list(&self) -> Vec<ProcessInfo> {
        self.supervisor
            .running()
            .await
            .into_iter()
            .map(|p| ProcessInfo {
                name: p.name,
                pid: p.pid,
                log_path: p.log_path.display().to_string(),
            })
            .collect()
    }

    fn on_chat(&self, text: &str, addl: Option<Value>) -> GatewayReply {
        let addl = addl.unwrap_or(Value::Null);
        match parse_command(text) {
            Command::NoMatch => GatewayReply::Declined,
            Command::MissingTarget { command } => {
                let target = if command == skill_core::command::UNINSTALL_PREFIX {
                    "<name>"
                } else {
                    "<package>"
                };
                GatewayReply::Respond(BusResponse::ok(json!(format!(
                    "Usage: {command} {target}"
                ))))
            }
            Command::Install { package } => {
                let ack = format!("Request to install {package} received");
                self.spawn_chat_job(ChatJob::Install(InstallRequest {
                    package,
                    reply_to: addl,
                }));
                GatewayReply::Respond(BusResponse::ok(json!(ack)))
            }
            Command::Uninstall { name } => {
                let ack = format!("Request to remove {name} received");
                self.spawn_chat_job(ChatJob::Uninstall {
                    name,
                    reply_to: addl,
                });
                GatewayReply::Respond(BusResponse::ok(json!(ack)))
            }
        }
    }

    fn spawn_chat_job(&self, job: ChatJob) {
        let installer = Arc::clone(&self.installer);
        let bus = Arc::clone(&self.bus);
        let relay = self.relay_service_key.clone();

        self.tasks.spawn(async move {
            let (tx, rx) = unbounded_channel::<String>();
            let forwarder = tokio::spawn(forward_replies(bus, relay, job.reply_to().clone(), rx));

            let outcome = match &job {
                ChatJob::Install(request) => installer
                    .install(&request.package, &tx)
                    .await
                    .map(|_| ()),
                ChatJob::Uninstall { name, .. } => installer.uninstall(name, &tx).await,
            };
            if let Err(e) = outcome {
                warn!(error = %e, "chat request failed");
                tx.notify(&e.to_string());
            }

            drop(tx);
            if let Err(e) = forwarder.await {
                warn!(error = %e, "reply forwarder panicked");
            }
        });
    }

    /// Register with the communication relay as the handler for skill
    /// commands. Fire-and-forget.
    pub fn announce(&self) -> JoinHandle<BestEffort> {
        let message = RelayMessage::RegisterMsgHandler {
            mskey: self.service_key.clone(),
            mstype: "msg".to_string(),
            mshelp: vec![
                CommandHelp {
                    cmd: skill_core::command::INSTALL_PREFIX.to_string(),
                    txt: "install or upgrade a skill: /install <owner/repo>".to_string(),
                },
                CommandHelp {
                    cmd: skill_core::command::UNINSTALL_PREFIX.to_string(),
                    txt: "remove an installed skill: /uninstall <name>".to_string(),
                },
            ],
        };

        match serde_json::to_value(&message) {
            Ok(value) => bus::send(Arc::clone(&self.bus), &self.relay_service_key, value),
            Err(e) => tokio::spawn(async move { BestEffort::Failed(e.to_string()) }),
        }
    }

    /// Wait for background chat requests to finish.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

/// Relay progress messages to a chat, in order.
async fn forward_replies(
    bus: Arc<dyn Bus>,
    relay: String,
    addl: Value,
    mut rx: UnboundedReceiver<String>,
) {
    while let Some(msg) = rx.recv().await {
        let reply = RelayMessage::Reply {
            msg,
            addl: addl.clone(),
        };
        let value = match serde_json::to_value(&reply) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "failed to encode reply");
                continue;
            }
        };
        if let Err(e) = bus.request(&relay, value).await {
            warn!(service = %relay, error = %e, "failed to relay reply");
        }
    }
}
