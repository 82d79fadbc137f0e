//! The `CloudProvisioner` collaborator interface (`SPEC_FULL.md` §4.2, §9's cyclic-dependency
//! redesign note). Defined here rather than in `cloud_provisioner` so that crate depends on
//! this one for the trait, not the other way around.

use async_trait::async_trait;
use control_plane_common::{HostId, Result};

/// A freshly provisioned host, before its first heartbeat.
#[derive(Debug, Clone)]
pub struct ProvisionedHost {
    pub host_id: HostId,
    pub address: String,
    pub resource_id: String,
}

/// Abstracts the IaaS backend that creates and destroys worker hosts. Implemented by
/// `cloud_provisioner` against a concrete HTTP API; mocked directly in matchmaker/lifecycle
/// tests via a trivial in-memory implementation.
#[async_trait]
pub trait CloudProvisioner: Send + Sync {
    /// Submits a create request and polls until the host is reachable, per the two-phase
    /// create described in `SPEC_FULL.md` §4.2. Returns once the instance exists and its agent
    /// is listening, not once it has completed its first heartbeat.
    async fn provision_host(&self) -> Result<ProvisionedHost>;

    /// Tears down a previously provisioned host. Called unconditionally on any failure partway
    /// through `provision_host`'s two phases, and by the host monitor on stale/cleanup actions.
    async fn deprovision_host(&self, resource_id: &str) -> Result<()>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// A deterministic in-memory stand-in for tests in this crate that need a
    /// `CloudProvisioner` without reaching for the real HTTP-backed one.
    #[derive(Default)]
    pub struct MockProvisioner {
        pub next_id: AtomicU64,
        pub fail_next: std::sync::atomic::AtomicBool,
        pub deprovisioned: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CloudProvisioner for MockProvisioner {
        async fn provision_host(&self) -> Result<ProvisionedHost> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(control_plane_common::ControlPlaneError::FailedToCreateHost(
                    "mock failure".into(),
                ));
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(ProvisionedHost {
                host_id: HostId::from(format!("mock-host-{id}")),
                address: format!("10.0.0.{}:9000", id + 1),
                resource_id: format!("res-{id}"),
            })
        }

        async fn deprovision_host(&self, resource_id: &str) -> Result<()> {
            self.deprovisioned.lock().unwrap().push(resource_id.to_string());
            Ok(())
        }
    }
}
