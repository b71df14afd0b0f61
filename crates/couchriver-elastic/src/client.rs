//! Minimal Elasticsearch REST client backed by `reqwest`.
//!
//! Only what the river needs: `_bulk`, `_refresh` and single-document
//! get/put/delete on typed paths.

use std::time::Duration;

use couchriver_core::config::duration_str;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::EsError;

/// Connection settings for the index engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// Upper bound on any single request, including `_bulk`.
    #[serde(default = "default_request_timeout", with = "duration_str")]
    pub request_timeout: Duration,
}

fn default_url() -> String {
    "http://localhost:9200".into()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for EsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            request_timeout: default_request_timeout(),
        }
    }
}

pub struct EsClient {
    base: Url,
    http: reqwest::Client,
}

impl EsClient {
    pub fn new(config: &EsConfig) -> Result<Self, EsError> {
        let base = Url::parse(&config.url)?;
        if base.cannot_be_a_base() {
            return Err(EsError::Url(format!("{} cannot be a base URL", config.url)));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| EsError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { base, http })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// `base` with `segments` appended, each percent-encoded as one segment.
    pub fn url(&self, segments: &[&str]) -> Result<Url, EsError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| EsError::Url(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send an NDJSON bulk body and return the decoded response.
    pub async fn bulk(&self, body: String) -> Result<Value, EsError> {
        let resp = self
            .http
            .post(self.url(&["_bulk"])?)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let resp = check(resp).await?;
        Ok(resp.json::<Value>().await?)
    }

    /// Refresh `index`. Returns `false` when the index does not exist.
    pub async fn refresh(&self, index: &str) -> Result<bool, EsError> {
        let resp = self.http.post(self.url(&[index, "_refresh"])?).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(resp).await?;
        Ok(true)
    }

    /// Fetch a document's `_source`, or `None` when absent.
    pub async fn get_source(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
    ) -> Result<Option<Value>, EsError> {
        let resp = self.http.get(self.url(&[index, doc_type, id])?).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = check(resp).await?.json().await?;
        if body.get("found").and_then(Value::as_bool) == Some(false) {
            return Ok(None);
        }
        Ok(body.get("_source").cloned())
    }

    pub async fn put_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        source: &Value,
    ) -> Result<(), EsError> {
        let resp = self
            .http
            .put(self.url(&[index, doc_type, id])?)
            .json(source)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    /// Delete a document. A missing document is not an error.
    pub async fn delete_document(&self, index: &str, doc_type: &str, id: &str) -> Result<(), EsError> {
        let resp = self.http.delete(self.url(&[index, doc_type, id])?).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(resp).await?;
        Ok(())
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, EsError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let code = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(EsError::Status { code, body })
}
