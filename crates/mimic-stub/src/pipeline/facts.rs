//! Contract-level server state steering scenario selection.

use parking_lot::RwLock;
use serde_json::{Map, Value};

/// Facts set through `POST /state`, valid until the next traffic response
#[derive(Debug, Default)]
pub struct Facts {
    current: RwLock<Map<String, Value>>,
}

impl Facts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current facts.
    pub fn set(&self, facts: Map<String, Value>) {
        *self.current.write() = facts;
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.current.read().clone()
    }

    pub fn clear(&self) {
        self.current.write().clear();
    }

    /// Clears the facts when dropped, whichever way the request ends.
    pub fn clear_on_drop(&self) -> FactsGuard<'_> {
        FactsGuard { facts: self }
    }
}

pub struct FactsGuard<'a> {
    facts: &'a Facts,
}

impl Drop for FactsGuard<'_> {
    fn drop(&mut self) {
        self.facts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn facts_of(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_set_replaces() {
        let facts = Facts::new();
        facts.set(facts_of(json!({"a": 1, "b": 2})));
        facts.set(facts_of(json!({"c": 3})));
        assert_eq!(Value::Object(facts.snapshot()), json!({"c": 3}));
    }

    #[test]
    fn test_guard_clears_on_early_return() {
        fn serve(facts: &Facts, fail: bool) -> Result<(), ()> {
            let _guard = facts.clear_on_drop();
            if fail {
                return Err(());
            }
            Ok(())
        }

        let facts = Facts::new();
        facts.set(facts_of(json!({"user": "known"})));
        assert!(serve(&facts, true).is_err());
        assert!(facts.snapshot().is_empty());

        facts.set(facts_of(json!({"user": "known"})));
        assert!(serve(&facts, false).is_ok());
        assert!(facts.snapshot().is_empty());
    }
}
