//! Recognized configuration keys (`spec.md` §6).
//!
//! A plain `Default`-able struct rather than a `clap::Args` derive:
//! this crate has no CLI surface of its own, it is embedded by whatever
//! binary owns the IPC transport. The field names and defaults mirror
//! the wire-level option names exactly so a host can deserialize them
//! straight off a config file or environment without renaming.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Coordinator-wide tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Action await deadline in milliseconds. Host default 10s; clients
    /// commonly run with a longer value (`spec.md` §6).
    pub action_completion_timeout_ms: u64,
    /// Pending-action ceiling per queue.
    pub max_queue_size: usize,
    pub resource_management: ResourceManagementConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            action_completion_timeout_ms: 10_000,
            max_queue_size: 100,
            resource_management: ResourceManagementConfig::default(),
        }
    }
}

impl CoreConfig {
    pub fn action_completion_timeout(&self) -> Duration {
        Duration::from_millis(self.action_completion_timeout_ms)
    }
}

/// Periodic-cleanup knobs for expired `StateUpdate`s and destroyed client
/// trackers (`spec.md` §6, §5 "Scoped resource release").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceManagementConfig {
    pub enable_periodic_cleanup: bool,
    pub cleanup_interval_ms: u64,
    pub max_subscription_managers: usize,
}

impl Default for ResourceManagementConfig {
    fn default() -> Self {
        Self {
            enable_periodic_cleanup: true,
            cleanup_interval_ms: 600_000,
            max_subscription_managers: 1000,
        }
    }
}

impl ResourceManagementConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}
