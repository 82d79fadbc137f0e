//! # Worker Agent
//!
//! The per-host process supervisor (`SPEC_FULL.md` §4.2): owns the locally-spawned game-server
//! processes and their ports, emits a heartbeat to the control plane every few seconds, and
//! exposes its own small HTTP surface so the control plane's Matchmaker and Lifecycle Monitor
//! can address it directly.
//!
//! ## Modules
//!
//! * **config** (`AgentConfig`) - TOML-backed configuration, same idiom as the control plane's.
//! * **port_allocator** - the fixed local port range and lowest-free-port allocation.
//! * **process** (`ManagedServer`) - real OS process supervision via `tokio::process::Command`.
//! * **agent** (`Agent`) - the shared state, the heartbeat loop, and the shutdown barrier.
//! * **http** - the agent-local axum router.

pub mod agent;
pub mod config;
pub mod http;
pub mod port_allocator;
pub mod process;

pub use agent::Agent;
pub use config::AgentConfig;
