//! Hook configuration.

use crate::hooks::FailMode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HookConfig {
    /// Shell command, run with `sh -c`
    pub command: String,
    #[serde(default = "default_hook_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub fail_mode: FailMode,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HooksConfig {
    /// Rewrites traffic requests before expectation lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<HookConfig>,
    /// Rewrites every traffic response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HookConfig>,
    /// Timeout for `external-command` responses
    #[serde(default = "default_hook_timeout_ms")]
    pub command_timeout_ms: u64,
}

fn default_hook_timeout_ms() -> u64 {
    5_000
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            request: None,
            response: None,
            command_timeout_ms: default_hook_timeout_ms(),
        }
    }
}
