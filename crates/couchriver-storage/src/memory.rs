//! In-memory storage backend.
//!
//! Keeps one checkpoint record per river in RAM.
//! Useful for testing and for rivers that may replay from scratch on restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use couchriver_core::{CheckpointStore, RiverError};

/// A stored checkpoint together with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// River name.
    pub key: String,
    /// Sequence token in its stored string form.
    pub last_seq: String,
    /// Number of writes since the record was created.
    pub writes: u64,
    pub updated_at: DateTime<Utc>,
}

/// In-memory checkpoint storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    records: Mutex<HashMap<String, CheckpointRecord>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full record for `key`.
    pub fn record(&self, key: &str) -> Option<CheckpointRecord> {
        self.lock().get(key).cloned()
    }

    /// All records, ordered by key.
    pub fn records(&self) -> Vec<CheckpointRecord> {
        let mut all: Vec<_> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CheckpointRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, RiverError> {
        Ok(self.lock().get(key).map(|r| r.last_seq.clone()))
    }

    async fn set(&self, key: &str, token: &str) -> Result<(), RiverError> {
        let now = Utc::now();
        let mut records = self.lock();
        let record = records.entry(key.to_string()).or_insert_with(|| CheckpointRecord {
            key: key.to_string(),
            last_seq: String::new(),
            writes: 0,
            updated_at: now,
        });
        record.last_seq = token.to_string();
        record.writes += 1;
        record.updated_at = now;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RiverError> {
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checkpoint_roundtrip() {
        let store = InMemoryStorage::new();
        assert!(store.get("orders").await.unwrap().is_none());

        store.set("orders", "10").await.unwrap();
        store.set("orders", r#"[11,"g1AAAA"]"#).await.unwrap();

        assert_eq!(store.get("orders").await.unwrap().as_deref(), Some(r#"[11,"g1AAAA"]"#));
        let record = store.record("orders").unwrap();
        assert_eq!(record.writes, 2);
        assert_eq!(record.key, "orders");
    }

    #[tokio::test]
    async fn rivers_are_isolated() {
        let store = InMemoryStorage::new();
        store.set("b", "2").await.unwrap();
        store.set("a", "1").await.unwrap();

        let keys: Vec<_> = store.records().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["a", "b"]);

        store.delete("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));
    }
}
