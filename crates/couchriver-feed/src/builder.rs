//! Fluent builder API for creating rivers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use couchriver_core::{MemoryCheckpointStore, MemorySink};
//! use couchriver_feed::RiverBuilder;
//!
//! # async fn example() -> Result<(), couchriver_core::RiverError> {
//! let mut river = RiverBuilder::new("orders")
//!     .host("couch.internal")
//!     .filter("app/active")
//!     .bulk_size(500)
//!     .build(Arc::new(MemorySink::new()), Arc::new(MemoryCheckpointStore::new()))?;
//! river.start()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use couchriver_core::{BulkSink, CheckpointStore, RiverConfig, RiverError};
use serde_json::Value;

use crate::client::HttpFeedClient;
use crate::river::River;

/// Fluent builder for `RiverConfig` and `River`.
pub struct RiverBuilder {
    config: RiverConfig,
}

impl RiverBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: RiverConfig::new(name),
        }
    }

    /// Start from an existing configuration.
    pub fn from_config(config: RiverConfig) -> Self {
        Self { config }
    }

    /// Use HTTPS.
    pub fn https(mut self) -> Self {
        self.config.couchdb.protocol = "https".into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.couchdb.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.couchdb.port = port;
        self
    }

    /// Set the database (defaults to the river name).
    pub fn db(mut self, db: impl Into<String>) -> Self {
        self.config.couchdb.db = Some(db.into());
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.config.couchdb.filter = Some(filter.into());
        self
    }

    pub fn filter_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.couchdb.filter_params.insert(key.into(), value.into());
        self
    }

    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.couchdb.user = Some(user.into());
        self.config.couchdb.password = Some(password.into());
        self
    }

    /// Disable TLS hostname verification.
    pub fn no_verify(mut self, no_verify: bool) -> Self {
        self.config.couchdb.no_verify = no_verify;
        self
    }

    pub fn ignore_attachments(mut self, ignore: bool) -> Self {
        self.config.couchdb.ignore_attachments = ignore;
        self
    }

    pub fn heartbeat(mut self, d: Duration) -> Self {
        self.config.couchdb.heartbeat = d;
        self
    }

    pub fn read_timeout(mut self, d: Duration) -> Self {
        self.config.couchdb.read_timeout = Some(d);
        self
    }

    /// Pause between reconnect attempts.
    pub fn backoff(mut self, d: Duration) -> Self {
        self.config.couchdb.backoff = d;
        self
    }

    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.config.index.index = Some(index.into());
        self
    }

    pub fn doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.config.index.doc_type = Some(doc_type.into());
        self
    }

    pub fn bulk_size(mut self, size: usize) -> Self {
        self.config.index.bulk_size = size;
        self
    }

    pub fn bulk_timeout(mut self, d: Duration) -> Self {
        self.config.index.bulk_timeout = d;
        self
    }

    /// Queue capacity; `-1` for unbounded.
    pub fn throttle_size(mut self, size: i64) -> Self {
        self.config.index.throttle_size = Some(size);
        self
    }

    pub fn river_index(mut self, index: impl Into<String>) -> Self {
        self.config.river_index = index.into();
        self
    }

    /// Build the `RiverConfig`.
    pub fn build_config(self) -> RiverConfig {
        self.config
    }

    /// Build a river reading the configured CouchDB over HTTP.
    pub fn build(
        self,
        sink: Arc<dyn BulkSink>,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<River, RiverError> {
        self.config.validate()?;
        let client = HttpFeedClient::from_river(&self.config)?;
        Ok(River::new(self.config, Arc::new(client), sink, store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use couchriver_core::QueueCapacity;

    #[test]
    fn builder_defaults() {
        let cfg = RiverBuilder::new("orders").build_config();
        assert_eq!(cfg.couchdb.host, "localhost");
        assert_eq!(cfg.couchdb.port, 5984);
        assert_eq!(cfg.index.bulk_size, 100);
        assert_eq!(cfg.db(), "orders");
    }

    #[test]
    fn builder_custom() {
        let cfg = RiverBuilder::new("r")
            .https()
            .host("couch.example")
            .port(6984)
            .db("orders")
            .filter("app/open")
            .filter_param("status", "open")
            .index("search")
            .doc_type("order")
            .bulk_size(20)
            .throttle_size(-1)
            .build_config();

        assert_eq!(cfg.couchdb.protocol, "https");
        assert_eq!(cfg.db(), "orders");
        assert_eq!(cfg.index_name(), "search");
        assert_eq!(cfg.type_name(), "order");
        assert_eq!(cfg.queue_capacity().unwrap(), QueueCapacity::Unbounded);
        assert_eq!(cfg.couchdb.filter_params["status"], "open");
    }

    #[test]
    fn build_rejects_invalid_config() {
        let res = RiverBuilder::new("r").bulk_size(0).build(
            Arc::new(couchriver_core::MemorySink::new()),
            Arc::new(couchriver_core::MemoryCheckpointStore::new()),
        );
        assert!(matches!(res, Err(RiverError::Config(_))));
    }
}
