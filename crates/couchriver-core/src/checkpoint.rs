//! Checkpoint manager: persists the last processed feed position.
//!
//! The checkpoint is a single string under a fixed key (the river name).
//! The feed reader loads it on every (re)connect; the mutator saves it after
//! each batch that produced a token. Stores treat the value as opaque.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::RiverError;
use crate::token::SequenceToken;

/// Trait for storing and loading checkpoints.
///
/// Implementations include `MemoryCheckpointStore`, `SqliteCheckpointStore`
/// and `EsCheckpointStore`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the stored token for `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, RiverError>;

    /// Save (upsert) the token for `key`.
    async fn set(&self, key: &str, token: &str) -> Result<(), RiverError>;

    /// Delete the checkpoint (e.g. when resetting a river).
    async fn delete(&self, key: &str) -> Result<(), RiverError>;
}

#[async_trait]
impl<S: CheckpointStore + ?Sized> CheckpointStore for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<String>, RiverError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, token: &str) -> Result<(), RiverError> {
        (**self).set(key, token).await
    }

    async fn delete(&self, key: &str) -> Result<(), RiverError> {
        (**self).delete(key).await
    }
}

/// Checkpoint reads and writes for one river.
///
/// Cloning shares the underlying store.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    key: String,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the saved checkpoint (returns `None` if none exists).
    pub async fn load(&self) -> Result<Option<String>, RiverError> {
        self.store.get(&self.key).await
    }

    /// Save `token` in its checkpoint form and return what was written.
    pub async fn save(&self, token: &SequenceToken) -> Result<String, RiverError> {
        let value = token.to_checkpoint_string();
        tracing::trace!(key = %self.key, last_seq = %value, "saving checkpoint");
        self.store.set(&self.key, &value).await?;
        Ok(value)
    }

    /// Remove the checkpoint, so the next connect starts from the beginning.
    pub async fn reset(&self) -> Result<(), RiverError> {
        self.store.delete(&self.key).await
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory checkpoint store for tests and ephemeral rivers.
///
/// Every write is also appended to a history so tests can inspect the
/// sequence of checkpoints.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, String>>,
    history: Mutex<Vec<String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a checkpoint.
    pub fn with_checkpoint(key: &str, token: &str) -> Self {
        let store = Self::default();
        lock(&store.data).insert(key.to_string(), token.to_string());
        store
    }

    /// Every value written through `set`, oldest first.
    pub fn history(&self) -> Vec<String> {
        lock(&self.history).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, key: &str) -> Result<Option<String>, RiverError> {
        Ok(lock(&self.data).get(key).cloned())
    }

    async fn set(&self, key: &str, token: &str) -> Result<(), RiverError> {
        lock(&self.data).insert(key.to_string(), token.to_string());
        lock(&self.history).push(token.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RiverError> {
        lock(&self.data).remove(key);
        Ok(())
    }
}
