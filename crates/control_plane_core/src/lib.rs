//! # Control Plane Core
//!
//! The request-dispatch and lifecycle engine shared by the `control_plane` binary: the Host
//! Registry, the Matchmaker's 6-step decision order, the Lifecycle Monitor's periodic reaping
//! tasks, the Save Barrier, the Broadcast Bus, and the resilience/security plumbing wrapping
//! every outbound call to a worker agent or the cloud provisioner.
//!
//! ## Design philosophy
//!
//! This crate holds **no transport layer** of its own beyond an outbound `AgentClient`; the
//! HTTP front adapter that exposes these operations to clients lives in the `control_plane`
//! binary crate, built on top of the types re-exported here.
//!
//! ## Architecture overview
//!
//! * **Host Registry** (`registry`) - the single shared source of truth for worker hosts and
//!   their server tables, behind one asynchronous lock.
//! * **Matchmaker** (`matchmaker`) - turns an authenticated user id into a bound server, in the
//!   fixed decision order: maintenance check, private binding, best public fit, spawn on
//!   master, spawn on remote, provision.
//! * **Lifecycle Monitor** (`lifecycle`) - the host monitor and master-server monitor periodic
//!   tasks that reap stale hosts and idle servers.
//! * **Save Barrier** (`save_barrier`) - tracks outstanding player-data writes so shutdown can
//!   wait for them to drain.
//! * **Broadcast Bus** (`broadcast`) - the ring + mailboxes + pull API for maintenance and
//!   server-wide announcements.
//! * **CloudProvisioner** (`provisioner`) - the trait the concrete `cloud_provisioner` crate
//!   implements; defined here so this crate never depends on that one.
//!
//! ## Thread safety
//!
//! Every shared component here is constructed once and handed around as an `Arc`; internal
//! mutability is always `tokio::sync::{RwLock, Mutex, Notify}`, never a blocking primitive.

pub mod agent_client;
pub mod broadcast;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod matchmaker;
pub mod provisioner;
pub mod registry;
pub mod save_barrier;
pub mod security;
pub mod shutdown_scheduler;

pub use agent_client::AgentClient;
pub use broadcast::{BroadcastBus, SharedBroadcastBus};
pub use config::ControlPlaneConfig;
pub use health::HealthManager;
pub use lifecycle::LifecycleMonitor;
pub use matchmaker::{MatchResult, Matchmaker};
pub use provisioner::{CloudProvisioner, ProvisionedHost};
pub use registry::{HostRegistry, SharedRegistry};
pub use save_barrier::{SaveBarrier, SharedSaveBarrier};
pub use shutdown_scheduler::ShutdownScheduler;
