//! Message bus client.
//!
//! Requests are JSON objects with a `type` field addressed to a service
//! key. [`HttpBus`] delivers them as `POST <peer>/bus/<service-key>` and
//! expects a [`BusResponse`] back; `204 No Content` means the responder
//! declined the message.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use skill_core::protocol::BusResponse;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::BestEffort;

/// Per-request timeout for bus round trips.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no peer configured for service {0}")]
    NoPeer(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("{service} declined the request")]
    Declined { service: String },
    #[error("{service} replied with error: {message}")]
    Remote { service: String, message: String },
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Request/response access to other services.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn request(&self, service: &str, message: Value) -> Result<Value>;
}

/// Send a message without waiting for the reply.
///
/// Failures are logged; the returned handle can be awaited by callers that
/// want the outcome.
pub fn send(bus: Arc<dyn Bus>, service: &str, message: Value) -> JoinHandle<BestEffort> {
    let service = service.to_string();
    tokio::spawn(async move {
        match bus.request(&service, message).await {
            Ok(_) => BestEffort::Done,
            Err(e) => {
                warn!(%service, error = %e, "bus send failed");
                BestEffort::Failed(e.to_string())
            }
        }
    })
}

/// HTTP transport for the bus.
#[derive(Debug, Clone)]
pub struct HttpBus {
    client: reqwest::Client,
    peers: BTreeMap<String, String>,
}

impl HttpBus {
    /// Create a bus client. `peers` maps service keys to base URLs.
    pub fn new(peers: BTreeMap<String, String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BusError::Transport(e.to_string()))?;
        Ok(Self { client, peers })
    }

    /// URL a message for `service` is posted to.
    pub fn endpoint(&self, service: &str) -> Result<String> {
        let base = self
            .peers
            .get(service)
            .ok_or_else(|| BusError::NoPeer(service.to_string()))?;
        Ok(format!("{}/bus/{service}", base.trim_end_matches('/')))
    }
}

#[async_trait]
impl Bus for HttpBus {
    async fn request(&self, service: &str, message: Value) -> Result<Value> {
        let url = self.endpoint(service)?;
        debug!(%service, %url, "bus request");

        let response = self
            .client
            .post(&url)
            .json(&message)
            .send()
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Err(BusError::Declined {
                service: service.to_string(),
            });
        }

        let body: BusResponse = response.json().await.map_err(|e| {
            BusError::Transport(format!("invalid reply from {service} ({status}): {e}"))
        })?;

        body.into_result().map_err(|message| BusError::Remote {
            service: service.to_string(),
            message,
        })
    }
}
