//! The settings file read by `couchriver run` and `couchriver checkpoint`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use couchriver_core::{CheckpointStore, RiverConfig};
use couchriver_elastic::{EsCheckpointStore, EsClient, EsConfig};
use couchriver_storage::InMemoryStorage;
use serde::{Deserialize, Serialize};

use crate::telemetry::LogConfig;

/// Where the checkpoint lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// In the river index (`{river_index}/{name}/_seq`).
    #[default]
    Elasticsearch,
    /// Process memory; every start replays the feed from the beginning.
    Memory,
    /// A local SQLite file.
    #[cfg(feature = "sqlite")]
    Sqlite { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(flatten)]
    pub river: RiverConfig,
    #[serde(default)]
    pub elasticsearch: EsConfig,
    #[serde(default)]
    pub checkpoint: CheckpointBackend,
    #[serde(default)]
    pub log: LogConfig,
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(raw)?;
        cfg.river.validate()?;
        Ok(cfg)
    }

    pub fn es_client(&self) -> Result<Arc<EsClient>> {
        Ok(Arc::new(EsClient::new(&self.elasticsearch)?))
    }

    /// Open the configured checkpoint store.
    pub async fn checkpoint_store(&self, client: Arc<EsClient>) -> Result<Arc<dyn CheckpointStore>> {
        Ok(match &self.checkpoint {
            CheckpointBackend::Elasticsearch => {
                Arc::new(EsCheckpointStore::new(client, self.river.river_index.clone()))
            }
            CheckpointBackend::Memory => Arc::new(InMemoryStorage::new()),
            #[cfg(feature = "sqlite")]
            CheckpointBackend::Sqlite { path } => {
                Arc::new(couchriver_storage::SqliteStorage::open(path).await?)
            }
        })
    }
}
