//! Health check surface for the control plane: aggregates registry/save-barrier/broadcast-bus
//! state and the resilience circuit breakers wrapping the cloud provisioner and agent calls.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

pub mod circuit_breaker;

use crate::broadcast::BroadcastBus;
use crate::registry::HostRegistry;
use crate::save_barrier::SaveBarrier;
use circuit_breaker::CircuitBreaker;

#[derive(Debug)]
pub struct HealthManager {
    start_time: Instant,
    last_health_check: Arc<RwLock<Option<HealthCheckResult>>>,
    circuit_breakers: Arc<RwLock<Vec<CircuitBreaker>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub active_hosts: usize,
    pub active_servers: usize,
    pub pending_saves: usize,
    pub maintenance_mode: bool,
    pub open_circuit_breakers: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthManager {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            last_health_check: Arc::new(RwLock::new(None)),
            circuit_breakers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Adds a circuit breaker to monitor (one per collaborator: cloud provisioner, each agent).
    pub async fn add_circuit_breaker(&self, circuit_breaker: CircuitBreaker) {
        self.circuit_breakers.write().await.push(circuit_breaker);
    }

    pub async fn perform_health_check(
        &self,
        registry: &HostRegistry,
        save_barrier: &SaveBarrier,
        broadcast_bus: &BroadcastBus,
    ) -> HealthCheckResult {
        let mut warnings = Vec::new();

        let hosts = registry.all_hosts().await;
        let active_hosts = hosts.len();
        let active_servers: usize = hosts.iter().map(|h| h.servers.len()).sum();
        let pending_saves = save_barrier.pending_count().await;

        let mut open_circuit_breakers = Vec::new();
        for cb in self.circuit_breakers.read().await.iter() {
            if cb.is_open().await {
                open_circuit_breakers.push(cb.name().to_string());
            }
        }

        if pending_saves > 0 {
            warnings.push(format!("{pending_saves} pending saves"));
        }

        let status = if !open_circuit_breakers.is_empty() {
            HealthStatus::Unhealthy
        } else if !warnings.is_empty() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let result = HealthCheckResult {
            status,
            timestamp: control_plane_common::now_unix(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            active_hosts,
            active_servers,
            pending_saves,
            maintenance_mode: broadcast_bus.is_maintenance_mode(),
            open_circuit_breakers,
            warnings,
        };

        *self.last_health_check.write().await = Some(result.clone());
        result
    }

    pub async fn get_last_health_check(&self) -> Option<HealthCheckResult> {
        self.last_health_check.read().await.clone()
    }

    pub async fn liveness_check(&self) -> bool {
        true
    }

    /// Ready to take traffic as long as no monitored circuit breaker (cloud provisioner, agent
    /// calls) is currently open.
    pub async fn readiness_check(&self) -> bool {
        for cb in self.circuit_breakers.read().await.iter() {
            if cb.is_open().await {
                return false;
            }
        }
        true
    }
}

impl Default for HealthManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn health_check_reports_zero_state_as_healthy() {
        let health = HealthManager::new();
        let registry = HostRegistry::new();
        let save_barrier = SaveBarrier::new(Duration::from_secs(30));
        let bus = BroadcastBus::new();

        let result = health.perform_health_check(&registry, &save_barrier, &bus).await;
        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(result.active_hosts, 0);
    }

    #[tokio::test]
    async fn pending_saves_degrade_status() {
        let health = HealthManager::new();
        let registry = HostRegistry::new();
        let save_barrier = SaveBarrier::new(Duration::from_secs(30));
        let bus = BroadcastBus::new();
        save_barrier.start(1, "update").await;

        let result = health.perform_health_check(&registry, &save_barrier, &bus).await;
        assert_eq!(result.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn liveness_is_always_true() {
        let health = HealthManager::new();
        assert!(health.liveness_check().await);
    }
}
