//! Configuration types for the Mimic stub server.

mod events;
mod hooks;
mod listen;
mod upstream;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use events::EventsConfig;
pub use hooks::{HookConfig, HooksConfig};
pub use listen::ListenConfig;
pub use upstream::PassThroughConfig;

use crate::admin_api::ADMIN_PREFIX;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MimicConfig {
    #[serde(default)]
    pub listen: ListenConfig,

    /// Contract files (YAML or JSON), loaded in order
    #[serde(default)]
    pub contracts: Vec<String>,

    /// Directories of expectation JSON files, loaded as static expectations
    #[serde(default)]
    pub examples: Vec<String>,

    /// Reject unmatched requests with 400 instead of generating a response
    #[serde(default)]
    pub strict_mode: bool,

    /// Generate contract error responses for requests that fit no scenario
    #[serde(default)]
    pub generative: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_through: Option<PassThroughConfig>,

    /// Delay added to every traffic response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,

    #[serde(default)]
    pub hooks: HooksConfig,

    #[serde(default)]
    pub events: EventsConfig,

    /// Traffic interactions kept in the request log
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    /// How long open connections get to finish on shutdown
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_log_capacity() -> usize {
    1_000
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

impl Default for MimicConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            contracts: Vec::new(),
            examples: Vec::new(),
            strict_mode: false,
            generative: false,
            pass_through: None,
            delay_ms: None,
            hooks: HooksConfig::default(),
            events: EventsConfig::default(),
            log_capacity: default_log_capacity(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl MimicConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: MimicConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.listen.host.trim().is_empty() {
            anyhow::bail!("listen.host must not be empty");
        }

        if let Some(pass_through) = &self.pass_through {
            let url = pass_through.url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!(
                    "pass_through.url must start with http:// or https://, got '{}'",
                    pass_through.url
                );
            }
            if pass_through.timeout_ms == 0 {
                anyhow::bail!("pass_through.timeout_ms must be greater than 0");
            }
        }

        for (name, hook) in [
            ("request", &self.hooks.request),
            ("response", &self.hooks.response),
        ] {
            if let Some(hook) = hook {
                if hook.command.trim().is_empty() {
                    anyhow::bail!("hooks.{name}.command must not be empty");
                }
                if hook.timeout_ms == 0 {
                    anyhow::bail!("hooks.{name}.timeout_ms must be greater than 0");
                }
            }
        }
        if self.hooks.command_timeout_ms == 0 {
            anyhow::bail!("hooks.command_timeout_ms must be greater than 0");
        }

        if !self.events.path.starts_with('/') {
            anyhow::bail!("events.path must start with '/', got '{}'", self.events.path);
        }
        let reserved_events = format!("{ADMIN_PREFIX}/events");
        if self.events.path.starts_with(ADMIN_PREFIX) && self.events.path != reserved_events {
            anyhow::bail!(
                "events.path under {ADMIN_PREFIX} must be exactly {reserved_events}, got '{}'",
                self.events.path
            );
        }
        if self.events.backlog == 0 {
            anyhow::bail!("events.backlog must be greater than 0");
        }
        if self.log_capacity == 0 {
            anyhow::bail!("log_capacity must be greater than 0");
        }

        Ok(())
    }
}
