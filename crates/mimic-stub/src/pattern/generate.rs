//! Value generation from patterns.

use super::Pattern;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Value};

/// Generates concrete values that satisfy a pattern.
///
/// Object fields whose key names a fact take the fact's value, provided it
/// fits the field's pattern; everything else is random. Optional fields are
/// left out.
pub struct Generator<'a> {
    facts: &'a Map<String, Value>,
}

impl<'a> Generator<'a> {
    pub fn new(facts: &'a Map<String, Value>) -> Self {
        Self { facts }
    }

    pub fn generate(&self, pattern: &Pattern) -> Value {
        let mut rng = rand::thread_rng();
        match pattern {
            Pattern::Anything | Pattern::String => Value::String(random_word(&mut rng)),
            Pattern::Number | Pattern::Integer => Value::from(rng.gen_range(1..1000i64)),
            Pattern::Boolean => Value::Bool(rng.gen()),
            Pattern::Null => Value::Null,
            Pattern::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
            Pattern::Date => Value::String(Utc::now().format("%Y-%m-%d").to_string()),
            Pattern::DateTime => Value::String(Utc::now().to_rfc3339()),
            Pattern::Exact(value) => value.clone(),
            Pattern::Nullable(inner) => self.generate(inner),
            Pattern::List(item) => {
                let len = rng.gen_range(1..=3);
                Value::Array((0..len).map(|_| self.generate(item)).collect())
            }
            Pattern::Tuple(items) => Value::Array(items.iter().map(|p| self.generate(p)).collect()),
            Pattern::Object(fields) => {
                let mut obj = Map::new();
                for field in fields.iter().filter(|f| !f.optional) {
                    let value = match self.facts.get(&field.key) {
                        Some(fact) if field.pattern.matches(fact).is_ok() => fact.clone(),
                        _ => self.generate(&field.pattern),
                    };
                    obj.insert(field.key.clone(), value);
                }
                Value::Object(obj)
            }
        }
    }
}

impl Pattern {
    /// Generate a value without facts.
    pub fn generate(&self) -> Value {
        Generator::new(&Map::new()).generate(self)
    }
}

fn random_word(rng: &mut impl Rng) -> String {
    let len = rng.gen_range(5..=10);
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
