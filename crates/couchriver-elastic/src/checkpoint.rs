//! Checkpoints kept in the river index.
//!
//! Each river owns the document `{river_index}/{river_name}/_seq`:
//!
//! ```json
//! {"couchdb": {"last_seq": "<token>"}}
//! ```
//!
//! The river index is refreshed before every read so a checkpoint written
//! moments ago by a previous connection is visible.

use std::sync::Arc;

use async_trait::async_trait;
use couchriver_core::{CheckpointStore, RiverError};
use serde_json::{json, Value};
use tracing::debug;

use crate::client::EsClient;
use crate::error::EsError;

/// Document id of the checkpoint within the river's type.
pub const SEQ_DOC_ID: &str = "_seq";

pub struct EsCheckpointStore {
    client: Arc<EsClient>,
    river_index: String,
}

fn storage(e: EsError) -> RiverError {
    RiverError::Storage(e.to_string())
}

impl EsCheckpointStore {
    pub fn new(client: Arc<EsClient>, river_index: impl Into<String>) -> Self {
        Self {
            client,
            river_index: river_index.into(),
        }
    }

    pub fn river_index(&self) -> &str {
        &self.river_index
    }
}

#[async_trait]
impl CheckpointStore for EsCheckpointStore {
    async fn get(&self, key: &str) -> Result<Option<String>, RiverError> {
        if !self.client.refresh(&self.river_index).await.map_err(storage)? {
            debug!(index = %self.river_index, "river index missing, no checkpoint");
            return Ok(None);
        }
        let source = self
            .client
            .get_source(&self.river_index, key, SEQ_DOC_ID)
            .await
            .map_err(storage)?;

        Ok(source.and_then(|s| match s.pointer("/couchdb/last_seq") {
            Some(Value::String(seq)) => Some(seq.clone()),
            Some(Value::Null) | None => None,
            // Written by something other than a river; keep its JSON text.
            Some(other) => Some(other.to_string()),
        }))
    }

    async fn set(&self, key: &str, token: &str) -> Result<(), RiverError> {
        let doc = json!({"couchdb": {"last_seq": token}});
        self.client
            .put_document(&self.river_index, key, SEQ_DOC_ID, &doc)
            .await
            .map_err(storage)
    }

    async fn delete(&self, key: &str) -> Result<(), RiverError> {
        self.client
            .delete_document(&self.river_index, key, SEQ_DOC_ID)
            .await
            .map_err(storage)
    }
}
