//! Engine tuning: reconnect delay and failure bounds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::DEFAULT_RECONNECT_DELAY;

/// Default consecutive failed hanging-get connects before the session is abandoned.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default consecutive control-socket failures before the session is abandoned.
pub const DEFAULT_MAX_CONTROL_FAILURES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Delay before retrying a refused or failed connect (default 2000 ms).
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Consecutive failed hanging-get connects tolerated (default 5).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Consecutive failed control requests tolerated (default 3).
    #[serde(default = "default_max_control_failures")]
    pub max_control_failures: u32,
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_millis() as u64
}
fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}
fn default_max_control_failures() -> u32 {
    DEFAULT_MAX_CONTROL_FAILURES
}

impl ClientConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            max_control_failures: default_max_control_failures(),
        }
    }
}
