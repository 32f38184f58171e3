//! Pass-through upstream configuration.

use serde::{Deserialize, Serialize};

/// Real service that unmatched requests are forwarded to
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PassThroughConfig {
    /// Base URL, e.g. `http://localhost:8080`
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl PassThroughConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_ms: default_timeout_ms(),
        }
    }
}
