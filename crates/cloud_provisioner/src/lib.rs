//! The concrete `CloudProvisioner` implementation: an HTTP client against an IaaS API,
//! rendering the Worker Agent bootstrap script and wrapping every call in a circuit breaker
//! (`SPEC_FULL.md` §4.1, §10.3). Depends on `control_plane_core` only for the trait and the
//! shared `CircuitBreaker`; never the other way around, per §9's cyclic-dependency redesign.

pub mod bootstrap;
pub mod client;

pub use client::{HttpCloudProvisioner, IaasConfig};
