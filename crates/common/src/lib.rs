//! Shared types for the control-plane workspace: the host/server data model, the error
//! taxonomy, shutdown coordination, and the player-data-store collaborator interface.
//!
//! Kept dependency-light on purpose: the crates that depend on this one (`control_plane_core`,
//! `worker_agent`, `cloud_provisioner`, `control_plane`) each bring their own HTTP, process and
//! config stacks; this crate only defines the shapes they agree on.

pub mod error;
pub mod model;
pub mod player_data;
pub mod shutdown;
pub mod time;

pub use error::{ControlPlaneError, ErrorBody, ErrorCode, Result};
pub use model::{
    Host, HeartbeatCommand, HeartbeatRequest, HeartbeatResponse, HostId, HostStatus, Server,
    ServerSnapshot, ServerStatus, ServerUid, MASTER_HOST_ID,
};
pub use player_data::{InMemoryPlayerDataStore, PlayerDataStore, PlayerRecord};
pub use shutdown::ShutdownState;
pub use time::now_unix;
