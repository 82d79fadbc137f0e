//! The concrete, HTTP-backed `CloudProvisioner`: a two-phase create against an IaaS API,
//! wrapped in the resilience policy of `SPEC_FULL.md` §10.3 (timeout + circuit breaker).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use control_plane_common::{ControlPlaneError, Result};
use control_plane_core::health::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use control_plane_core::provisioner::{CloudProvisioner, ProvisionedHost};

use crate::bootstrap;

/// IaaS connection details and the bootstrap parameters baked into every created host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IaasConfig {
    pub api_base_url: String,
    pub api_token: String,
    pub vm_image: String,
    pub instance_type: String,
    pub location: String,
    pub control_plane_url: String,
    pub shared_access_key: String,
    #[serde(default = "default_create_timeout_secs")]
    pub create_timeout_secs: u64,
    #[serde(default = "default_action_poll_interval_secs")]
    pub action_poll_interval_secs: u64,
}

fn default_create_timeout_secs() -> u64 {
    60
}

fn default_action_poll_interval_secs() -> u64 {
    3
}

#[derive(Debug, Serialize)]
struct CreateInstanceRequest<'a> {
    image: &'a str,
    instance_type: &'a str,
    location: &'a str,
    user_data: String,
}

#[derive(Debug, Deserialize)]
struct CreateInstanceResponse {
    action_id: String,
    resource_id: String,
}

#[derive(Debug, Deserialize)]
struct ActionStatus {
    status: String,
    address: Option<String>,
}

pub struct HttpCloudProvisioner {
    http: reqwest::Client,
    config: IaasConfig,
    circuit_breaker: CircuitBreaker,
}

impl HttpCloudProvisioner {
    pub fn new(config: IaasConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            circuit_breaker: CircuitBreaker::new(
                "cloud_provisioner".to_string(),
                CircuitBreakerConfig::default(),
            ),
        }
    }

    /// Exposes the provisioner's circuit breaker so the control plane's `HealthManager` can
    /// register it alongside the other collaborators it tracks (`SPEC_FULL.md` §10.3).
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.config.api_token)
    }

    async fn submit_create(&self, host_id: &str) -> Result<CreateInstanceResponse> {
        let script = bootstrap::render(host_id, &self.config.control_plane_url, &self.config.shared_access_key);
        let body = CreateInstanceRequest {
            image: &self.config.vm_image,
            instance_type: &self.config.instance_type,
            location: &self.config.location,
            user_data: script,
        };

        let response = self
            .http
            .post(format!("{}/v1/instances", self.config.api_base_url))
            .header("Authorization", self.auth_header())
            .timeout(Duration::from_secs(30))
            .json(&body)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Internal(e.into()))?;

        if !response.status().is_success() {
            return Err(ControlPlaneError::FailedToCreateHost(format!(
                "IaaS create returned {}",
                response.status()
            )));
        }

        response
            .json::<CreateInstanceResponse>()
            .await
            .map_err(|e| ControlPlaneError::Internal(e.into()))
    }

    async fn poll_action_until_address(&self, action_id: &str, deadline: tokio::time::Instant) -> Result<String> {
        loop {
            let response = self
                .http
                .get(format!("{}/v1/actions/{action_id}", self.config.api_base_url))
                .header("Authorization", self.auth_header())
                .timeout(Duration::from_secs(30))
                .send()
                .await
                .map_err(|e| ControlPlaneError::Internal(e.into()))?;

            let status: ActionStatus = response
                .json()
                .await
                .map_err(|e| ControlPlaneError::Internal(e.into()))?;

            debug!(action_id, status = %status.status, "polled IaaS action");

            match status.status.as_str() {
                "completed" => {
                    return status
                        .address
                        .ok_or_else(|| ControlPlaneError::FailedToCreateHost("action completed with no address".into()));
                }
                "failed" => {
                    return Err(ControlPlaneError::FailedToCreateHost(format!(
                        "IaaS action {action_id} failed"
                    )));
                }
                _ => {}
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ControlPlaneError::Timeout);
            }
            tokio::time::sleep(Duration::from_secs(self.config.action_poll_interval_secs)).await;
        }
    }

    async fn wait_agent_ready(&self, address: &str, deadline: tokio::time::Instant) -> Result<()> {
        loop {
            let probe = self
                .http
                .get(format!("{address}/status"))
                .timeout(Duration::from_secs(5))
                .send()
                .await;

            if let Ok(response) = probe {
                if response.status().is_success() {
                    return Ok(());
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ControlPlaneError::Timeout);
            }
            tokio::time::sleep(Duration::from_secs(self.config.action_poll_interval_secs)).await;
        }
    }

    async fn delete_instance(&self, resource_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/v1/instances/{resource_id}", self.config.api_base_url))
            .header("Authorization", self.auth_header())
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ControlPlaneError::Internal(e.into()))?;

        if !response.status().is_success() {
            return Err(ControlPlaneError::FailedToCreateHost(format!(
                "IaaS delete returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CloudProvisioner for HttpCloudProvisioner {
    /// Two-phase create: submit, poll the action to completion, then poll the agent's own
    /// status endpoint. Any failure past resource creation deletes that resource before
    /// returning, per §4.1's no-leaked-resource rule.
    async fn provision_host(&self) -> Result<ProvisionedHost> {
        if !self.circuit_breaker.can_execute().await {
            return Err(ControlPlaneError::FailedToCreateHost(
                "cloud provisioner circuit breaker is open".into(),
            ));
        }

        let host_id = format!("host-{}", Uuid::new_v4().simple());
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.create_timeout_secs);

        let created = match self.submit_create(&host_id).await {
            Ok(created) => created,
            Err(err) => {
                self.circuit_breaker.record_failure().await;
                return Err(err);
            }
        };

        let result = async {
            let address = self.poll_action_until_address(&created.action_id, deadline).await?;
            self.wait_agent_ready(&address, deadline).await?;
            Ok::<_, ControlPlaneError>(address)
        }
        .await;

        match result {
            Ok(address) => {
                self.circuit_breaker.record_success().await;
                info!(%host_id, resource_id = %created.resource_id, %address, "provisioned new worker host");
                Ok(ProvisionedHost {
                    host_id: control_plane_common::HostId::from(host_id),
                    address,
                    resource_id: created.resource_id,
                })
            }
            Err(err) => {
                self.circuit_breaker.record_failure().await;
                warn!(%host_id, resource_id = %created.resource_id, error = %err, "provisioning failed past resource creation, deleting");
                if let Err(delete_err) = self.delete_instance(&created.resource_id).await {
                    warn!(resource_id = %created.resource_id, error = %delete_err, "failed to delete leaked resource");
                }
                Err(err)
            }
        }
    }

    async fn deprovision_host(&self, resource_id: &str) -> Result<()> {
        if !self.circuit_breaker.can_execute().await {
            return Err(ControlPlaneError::FailedToCreateHost(
                "cloud provisioner circuit breaker is open".into(),
            ));
        }
        match self.delete_instance(resource_id).await {
            Ok(()) => {
                self.circuit_breaker.record_success().await;
                Ok(())
            }
            Err(err) => {
                self.circuit_breaker.record_failure().await;
                Err(err)
            }
        }
    }
}
