//! HTTP client for the skilld bus endpoint.

use reqwest::StatusCode;
use serde_json::Value;
use skill_core::protocol::{BusResponse, SkillRequest, SKILL_SERVICE_KEY};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default readiness probe window.
const DEFAULT_READY_TIMEOUT_MS: u64 = 3000;
const INITIAL_BACKOFF_MS: u64 = 200;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running at {addr}\n  → start with: skilld\n  → or set SKILLD_ADDR if using a different address")]
    ConnectionFailed { addr: String },

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Remote(String),

    #[error("daemon not ready after {timeout_ms}ms at {addr}")]
    DaemonNotReady { addr: String, timeout_ms: u64 },
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            let addr = e
                .url()
                .map_or_else(|| "unknown".to_string(), ToString::to_string);
            ClientError::ConnectionFailed { addr }
        } else {
            ClientError::HttpError {
                status: e.status().map_or(0, |s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }
}

/// What the daemon did with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Result(Value),
    /// The message was not a skill command.
    Declined,
}

/// Bus client bound to the skill service.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn bus_url(&self) -> String {
        format!("{}/bus/{}", self.base_url, SKILL_SERVICE_KEY)
    }

    /// Probe /health.
    pub async fn check_health(&self) -> Result<bool, ClientError> {
        let url = format!("{}/health", self.base_url);
        let response = self.http.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    /// Wait for the daemon to answer /health, backing off exponentially.
    pub async fn wait_for_ready(&self) -> Result<(), ClientError> {
        let start = Instant::now();
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            if let Ok(true) = self.check_health().await {
                return Ok(());
            }
            let elapsed = start.elapsed().as_millis() as u64;
            if elapsed >= DEFAULT_READY_TIMEOUT_MS {
                return Err(ClientError::DaemonNotReady {
                    addr: self.base_url.clone(),
                    timeout_ms: DEFAULT_READY_TIMEOUT_MS,
                });
            }
            let remaining = DEFAULT_READY_TIMEOUT_MS.saturating_sub(elapsed);
            tokio::time::sleep(Duration::from_millis(backoff_ms.min(remaining))).await;
            backoff_ms = backoff_ms.saturating_mul(2);
        }
    }

    /// Send one request to the skill service.
    pub async fn send(&self, request: &SkillRequest) -> Result<Reply, ClientError> {
        let response = self.http.post(self.bus_url()).json(request).send().await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(Reply::Declined);
        }

        let body: BusResponse = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(format!("{status}: {e}")))?;

        match body.into_result() {
            Ok(value) => Ok(Reply::Result(value)),
            Err(message) if status.is_success() => Err(ClientError::Remote(message)),
            Err(message) => Err(ClientError::HttpError {
                status: status.as_u16(),
                message,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_url_targets_skill_service() {
        let client = Client::new("http://127.0.0.1:7810/");
        assert_eq!(
            client.bus_url(),
            "http://127.0.0.1:7810/bus/everlife-skill-svc"
        );
    }

    #[tokio::test]
    async fn unreachable_daemon_is_connection_failed() {
        let client = Client::new("http://127.0.0.1:9");
        let err = client.send(&SkillRequest::List).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionFailed { .. }));
    }
}
