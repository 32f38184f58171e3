//! Request log and load log.
//!
//! The request log records the most recent traffic interactions, up to a
//! fixed capacity; older entries are evicted. The load log collects what
//! happened while loading contracts and static examples.

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// How a traffic response was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    Expectation,
    PassThrough,
    Strict,
    Generated,
    Error,
}

/// One served interaction
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub resolution: Resolution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expectation_id: Option<u64>,
    #[serde(rename = "http-request")]
    pub request: Value,
    #[serde(rename = "http-response")]
    pub response: Value,
}

impl LogEntry {
    pub fn new(resolution: Resolution, request: Value, response: Value) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            resolution,
            expectation_id: None,
            request,
            response,
        }
    }

    pub fn with_expectation(mut self, id: u64) -> Self {
        self.expectation_id = Some(id);
        self
    }
}

#[derive(Debug)]
pub struct RequestLog {
    entries: RwLock<VecDeque<LogEntry>>,
    capacity: usize,
    evicted: AtomicU64,
    load_messages: RwLock<Vec<String>>,
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            evicted: AtomicU64::new(0),
            load_messages: RwLock::new(Vec::new()),
        }
    }

    /// Append an entry, evicting the oldest one when full.
    pub fn record(&self, entry: LogEntry) {
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity {
            entries.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        entries.push_back(entry);
    }

    /// Retained entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().iter().cloned().collect()
    }

    /// Entries dropped to stay within capacity
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn record_load(&self, message: impl Into<String>) {
        self.load_messages.write().push(message.into());
    }

    pub fn load_log(&self) -> Vec<String> {
        self.load_messages.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_entry_serialization() {
        let entry = LogEntry::new(
            Resolution::PassThrough,
            json!({"method": "GET"}),
            json!({"status": 200}),
        )
        .with_expectation(3);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["resolution"], "pass-through");
        assert_eq!(value["expectation_id"], 3);
        assert_eq!(value["http-request"]["method"], "GET");
    }

    #[test]
    fn test_concurrent_appends() {
        let log = Arc::new(RequestLog::new(1_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        log.record(LogEntry::new(Resolution::Generated, json!({}), json!({})));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 400);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let log = RequestLog::new(3);
        for id in 0..5u64 {
            log.record(
                LogEntry::new(Resolution::Expectation, json!({}), json!({})).with_expectation(id),
            );
        }
        let ids: Vec<_> = log.entries().iter().map(|e| e.expectation_id).collect();
        assert_eq!(ids, vec![Some(2), Some(3), Some(4)]);
        assert_eq!(log.evicted(), 2);
    }

    #[test]
    fn test_load_log() {
        let log = RequestLog::new(10);
        assert!(log.is_empty());
        log.record_load("Loaded 2 expectations from a.json");
        assert_eq!(log.load_log(), vec!["Loaded 2 expectations from a.json"]);
    }
}
