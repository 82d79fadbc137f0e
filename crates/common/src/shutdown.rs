//! Shutdown coordination shared across the control plane and the worker agent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Two-phase shutdown flag pair, cheaply cloneable and safe to share across tasks.
#[derive(Debug, Clone)]
pub struct ShutdownState {
    shutdown_initiated: Arc<AtomicBool>,
    shutdown_complete: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_complete: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True once `initiate_shutdown` has run; new heartbeats/requests should stop being accepted.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Acquire)
    }

    pub fn initiate_shutdown(&self) {
        self.shutdown_initiated.store(true, Ordering::Release);
        info!("shutdown initiated, no further work will be accepted");
    }

    pub fn complete_shutdown(&self) {
        self.shutdown_complete.store(true, Ordering::Release);
        info!("shutdown complete");
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_the_running_state() {
        let state = ShutdownState::new();
        assert!(!state.is_shutdown_initiated());
        assert!(!state.is_shutdown_complete());
    }

    #[test]
    fn clones_share_the_same_flags() {
        let state = ShutdownState::new();
        let clone = state.clone();
        state.initiate_shutdown();
        assert!(clone.is_shutdown_initiated());
        clone.complete_shutdown();
        assert!(state.is_shutdown_complete());
    }
}
