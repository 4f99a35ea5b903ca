//! Supervisor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a transaction supervisor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Timeout applied to every participant RPC. A timed-out request marks
    /// the participant down and is retried during the commit/abort phases.
    pub rpc_timeout: Duration,

    /// Interval at which a downed participant is probed: each tick either
    /// drains one queued request or runs an availability check.
    pub participant_probation_period: Duration,

    /// Interval at which invalidated participant wrappers are reaped.
    pub participant_cleanup_period: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(15),
            participant_probation_period: Duration::from_secs(5),
            participant_cleanup_period: Duration::from_secs(15),
        }
    }
}

impl SupervisorConfig {
    /// Configuration for testing (short periods).
    pub fn testing() -> Self {
        Self {
            rpc_timeout: Duration::from_millis(100),
            participant_probation_period: Duration::from_millis(10),
            participant_cleanup_period: Duration::from_millis(50),
        }
    }
}
