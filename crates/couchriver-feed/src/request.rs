//! `_changes` request construction.
//!
//! ```text
//! GET /{db}/_changes?feed=continuous&include_docs=true&heartbeat={ms}
//!     [&filter={name}[&{param}={value}]*][&since={checkpoint}]
//! ```
//!
//! Filter parameters are only sent together with a filter. The checkpoint
//! is passed back exactly as stored, so an array token reaches the server
//! as the same JSON text it was saved as.

use std::collections::BTreeMap;
use std::time::Duration;

use couchriver_core::RiverConfig;
use serde_json::Value;
use url::Url;

use crate::error::FeedError;

/// Everything needed to build a feed URL, except the checkpoint.
#[derive(Debug, Clone)]
pub struct FeedRequest {
    pub db: String,
    pub heartbeat: Duration,
    pub filter: Option<String>,
    pub filter_params: BTreeMap<String, Value>,
}

impl FeedRequest {
    pub fn new(db: impl Into<String>, heartbeat: Duration) -> Self {
        Self {
            db: db.into(),
            heartbeat,
            filter: None,
            filter_params: BTreeMap::new(),
        }
    }

    pub fn from_river(cfg: &RiverConfig) -> Self {
        Self {
            db: cfg.db().to_string(),
            heartbeat: cfg.couchdb.heartbeat,
            filter: cfg.couchdb.filter.clone(),
            filter_params: cfg.couchdb.filter_params.clone(),
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_filter_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter_params.insert(key.into(), value.into());
        self
    }

    /// Build the feed URL against `base` (e.g. `http://localhost:5984`).
    pub fn url(&self, base: &Url, since: Option<&str>) -> Result<Url, FeedError> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| FeedError::Url(format!("{base} cannot be a base URL")))?
            .clear()
            .push(&self.db)
            .push("_changes");

        {
            let mut q = url.query_pairs_mut();
            q.clear();
            q.append_pair("feed", "continuous");
            q.append_pair("include_docs", "true");
            q.append_pair("heartbeat", &self.heartbeat.as_millis().to_string());
            if let Some(filter) = &self.filter {
                q.append_pair("filter", filter);
                for (key, value) in &self.filter_params {
                    q.append_pair(key, &param_text(value));
                }
            }
            if let Some(since) = since {
                q.append_pair("since", since);
            }
        }
        Ok(url)
    }
}

fn param_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
