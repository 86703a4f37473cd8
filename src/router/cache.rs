use std::collections::{BTreeMap, HashMap};

use md5::{Digest, Md5};
use parking_lot::Mutex;
use serde_json::Value;

use crate::types::RoutingDecision;

/// Bounded associative cache keyed by a normalized query + context digest.
/// On overflow the whole map is cleared rather than evicting one entry at a
/// time — a coarse, intentionally simple policy (see design notes).
pub struct RoutingCache {
    capacity: usize,
    entries: Mutex<HashMap<String, RoutingDecision>>,
}

impl RoutingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn key_for(query: &str, context: Option<&HashMap<String, Value>>) -> String {
        let normalized = query.trim().chars().flat_map(|c| c.to_lowercase()).collect::<String>();
        let canonical = match context {
            Some(ctx) if !ctx.is_empty() => {
                let sorted: BTreeMap<_, _> = ctx.iter().collect();
                serde_json::to_string(&sorted).unwrap_or_default()
            }
            _ => String::new(),
        };

        let mut hasher = Md5::new();
        hasher.update(normalized.as_bytes());
        hasher.update(b"|");
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<RoutingDecision> {
        let entries = self.entries.lock();
        entries.get(key).map(|decision| {
            let mut cloned = decision.clone();
            cloned.metadata.insert("cached".to_string(), Value::Bool(true));
            cloned
        })
    }

    pub fn insert(&self, key: String, decision: RoutingDecision) {
        let mut entries = self.entries.lock();
        if entries.len() > self.capacity {
            entries.clear();
        }
        entries.insert(key, decision);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
