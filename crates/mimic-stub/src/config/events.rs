//! Event stream configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventsConfig {
    /// Subscription endpoint
    #[serde(default = "default_path")]
    pub path: String,
    /// Events kept for replay to late subscribers
    #[serde(default = "default_backlog")]
    pub backlog: usize,
    /// Per-subscriber mailbox size; raised to `backlog` if smaller
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
}

fn default_path() -> String {
    "/_mimic/events".to_string()
}

fn default_backlog() -> usize {
    100
}

fn default_subscriber_capacity() -> usize {
    256
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            backlog: default_backlog(),
            subscriber_capacity: default_subscriber_capacity(),
        }
    }
}
