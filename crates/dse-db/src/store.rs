use dashmap::DashMap;
use std::collections::BTreeMap;

/// Opaque key to serialized-blob map. Every operation is atomic per key.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` and returns the previous blob, if any.
    fn set(&self, key: &str, value: String) -> Option<String>;

    fn contains(&self, key: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A consistent-per-key copy of every entry, ordered by key.
    fn snapshot(&self) -> BTreeMap<String, String>;
}

/// In-process store backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, value: String) -> Option<String> {
        self.entries.insert(key.to_string(), value)
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
