//! HTTP client for talking to a worker agent's own small router (`SPEC_FULL.md` §4.2, §5).
//! Every call here is wrapped by the caller in a `CircuitBreaker` (see `health::circuit_breaker`)
//! so a dead agent does not retry into the ground.

use control_plane_common::{ControlPlaneError, Result, ServerSnapshot};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct SpawnServerRequest {
    pub port: u16,
    pub owner_id: Option<u64>,
    pub private: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpawnServerResponse {
    pub uid: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentStatus {
    pub host_id: String,
    pub servers: Vec<ServerSnapshot>,
    pub cpu_percent: f32,
    pub memory_used_mb: u64,
}

/// A thin reqwest wrapper addressing one worker agent by its `host:port` address. Cheap to
/// construct per-call; the underlying `reqwest::Client` pools connections internally.
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl AgentClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    fn url(address: &str, path: &str) -> String {
        format!("http://{address}{path}")
    }

    pub async fn spawn_server(&self, address: &str, req: &SpawnServerRequest) -> Result<SpawnServerResponse> {
        self.http
            .post(Self::url(address, "/spawn_server"))
            .json(req)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                warn!(%address, error = %e, "spawn_server request failed");
                ControlPlaneError::Internal(e.into())
            })?
            .error_for_status()
            .map_err(|e| ControlPlaneError::Internal(e.into()))?
            .json()
            .await
            .map_err(|e| ControlPlaneError::Internal(e.into()))
    }

    pub async fn shutdown_server(&self, address: &str, uid: &str) -> Result<()> {
        self.http
            .post(Self::url(address, &format!("/shutdown/{uid}")))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Internal(e.into()))?
            .error_for_status()
            .map_err(|e| ControlPlaneError::Internal(e.into()))?;
        Ok(())
    }

    pub async fn shutdown_host(&self, address: &str) -> Result<()> {
        self.http
            .post(Self::url(address, "/shutdown"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Internal(e.into()))?
            .error_for_status()
            .map_err(|e| ControlPlaneError::Internal(e.into()))?;
        Ok(())
    }

    pub async fn status(&self, address: &str) -> Result<AgentStatus> {
        self.http
            .get(Self::url(address, "/status"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Internal(e.into()))?
            .error_for_status()
            .map_err(|e| ControlPlaneError::Internal(e.into()))?
            .json()
            .await
            .map_err(|e| ControlPlaneError::Internal(e.into()))
    }

    pub async fn push_global_message(&self, address: &str, message: &serde_json::Value) -> Result<()> {
        self.http
            .post(Self::url(address, "/global_message"))
            .json(message)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Internal(e.into()))?;
        Ok(())
    }
}
