//! River configuration.
//!
//! The layout mirrors the river settings document: a `couchdb` section for
//! the feed and an `index` section for the target index and bulk behavior.
//! Fields whose default depends on another field (`db`, `index`, `type`,
//! `read_timeout`, `throttle_size`) stay optional and are resolved by the
//! accessor methods on [`RiverConfig`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RiverError;

/// Top-level configuration for one river.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiverConfig {
    /// River name. Used as the default database name and as the checkpoint key.
    pub name: String,
    /// Index holding river state (the checkpoint record).
    #[serde(default = "default_river_index")]
    pub river_index: String,
    #[serde(default)]
    pub couchdb: FeedConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

fn default_river_index() -> String {
    "_river".into()
}

/// Connection settings for the `_changes` feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database name; defaults to the river name.
    #[serde(default)]
    pub db: Option<String>,
    /// Name of a filter function (`design/filter`).
    #[serde(default)]
    pub filter: Option<String>,
    /// Extra query parameters for the filter function.
    #[serde(default)]
    pub filter_params: BTreeMap<String, Value>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Skip TLS hostname verification.
    #[serde(default)]
    pub no_verify: bool,
    /// Strip `_attachments` from indexed documents.
    #[serde(default)]
    pub ignore_attachments: bool,
    #[serde(default = "default_heartbeat", with = "duration_str")]
    pub heartbeat: Duration,
    /// Read timeout; defaults to three heartbeats.
    #[serde(default, with = "duration_str::option")]
    pub read_timeout: Option<Duration>,
    /// Pause between a failed connection and the next attempt.
    #[serde(default = "default_backoff", with = "duration_str")]
    pub backoff: Duration,
}

fn default_protocol() -> String {
    "http".into()
}
fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    5984
}
fn default_heartbeat() -> Duration {
    Duration::from_secs(10)
}
fn default_backoff() -> Duration {
    Duration::from_secs(5)
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            host: default_host(),
            port: default_port(),
            db: None,
            filter: None,
            filter_params: BTreeMap::new(),
            user: None,
            password: None,
            no_verify: false,
            ignore_attachments: false,
            heartbeat: default_heartbeat(),
            read_timeout: None,
            backoff: default_backoff(),
        }
    }
}

/// Target index and bulk settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Target index; defaults to the database name.
    #[serde(default)]
    pub index: Option<String>,
    /// Target type; defaults to the database name.
    #[serde(default, rename = "type")]
    pub doc_type: Option<String>,
    /// Number of actions per bulk request.
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,
    /// How long the mutator waits for more lines when coalescing a batch.
    #[serde(default = "default_bulk_timeout", with = "duration_str")]
    pub bulk_timeout: Duration,
    /// Maximum time actions sit in the sink before a flush.
    #[serde(default = "default_flush_interval", with = "duration_str")]
    pub flush_interval: Duration,
    /// Bulk requests allowed in flight at once (0 = flush inline).
    #[serde(default = "default_max_concurrent_bulk")]
    pub max_concurrent_bulk: usize,
    /// Queue capacity; `-1` for unbounded. Defaults to `bulk_size * 5`.
    #[serde(default)]
    pub throttle_size: Option<i64>,
}

fn default_bulk_size() -> usize {
    100
}
fn default_bulk_timeout() -> Duration {
    Duration::from_millis(10)
}
fn default_flush_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_max_concurrent_bulk() -> usize {
    1
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index: None,
            doc_type: None,
            bulk_size: default_bulk_size(),
            bulk_timeout: default_bulk_timeout(),
            flush_interval: default_flush_interval(),
            max_concurrent_bulk: default_max_concurrent_bulk(),
            throttle_size: None,
        }
    }
}

/// Capacity of the change queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueCapacity {
    Bounded(usize),
    Unbounded,
}

impl QueueCapacity {
    /// Sentinel throttle size meaning "no bound".
    pub const UNBOUNDED_SENTINEL: i64 = -1;

    /// Interpret a `throttle_size` setting.
    pub fn from_throttle_size(size: i64) -> Result<Self, RiverError> {
        match size {
            Self::UNBOUNDED_SENTINEL => Ok(Self::Unbounded),
            n if n > 0 => Ok(Self::Bounded(n as usize)),
            n => Err(RiverError::Config(format!(
                "throttle_size must be positive or -1, got {n}"
            ))),
        }
    }
}

impl RiverConfig {
    /// Configuration with every default for the named river.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            river_index: default_river_index(),
            couchdb: FeedConfig::default(),
            index: IndexConfig::default(),
        }
    }

    /// Parse a JSON settings document.
    pub fn from_json_str(s: &str) -> Result<Self, RiverError> {
        let cfg: Self = serde_json::from_str(s).map_err(|e| RiverError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check settings that serde cannot.
    pub fn validate(&self) -> Result<(), RiverError> {
        if self.name.is_empty() {
            return Err(RiverError::Config("river name must not be empty".into()));
        }
        if self.couchdb.heartbeat.is_zero() {
            return Err(RiverError::Config("heartbeat must be non-zero".into()));
        }
        if self.couchdb.read_timeout.is_none() && self.couchdb.heartbeat.checked_mul(3).is_none() {
            return Err(RiverError::Config(format!(
                "heartbeat {} is too large to derive a read timeout from",
                duration_str::format(&self.couchdb.heartbeat)
            )));
        }
        if self.index.bulk_size == 0 {
            return Err(RiverError::Config("bulk_size must be at least 1".into()));
        }
        if self.couchdb.user.is_some() != self.couchdb.password.is_some() {
            tracing::warn!("couchdb user and password must both be set; authentication disabled");
        }
        self.queue_capacity().map(|_| ())
    }

    /// Database name (defaults to the river name).
    pub fn db(&self) -> &str {
        self.couchdb.db.as_deref().unwrap_or(&self.name)
    }

    /// Default target index (defaults to the database name).
    pub fn index_name(&self) -> &str {
        self.index.index.as_deref().unwrap_or_else(|| self.db())
    }

    /// Default target type (defaults to the database name).
    pub fn type_name(&self) -> &str {
        self.index.doc_type.as_deref().unwrap_or_else(|| self.db())
    }

    /// Read timeout (defaults to three heartbeats, saturating).
    pub fn read_timeout(&self) -> Duration {
        self.couchdb.read_timeout.unwrap_or_else(|| {
            self.couchdb
                .heartbeat
                .checked_mul(3)
                .unwrap_or(Duration::MAX)
        })
    }

    /// Queue capacity (defaults to five bulks).
    pub fn queue_capacity(&self) -> Result<QueueCapacity, RiverError> {
        let size = self
            .index
            .throttle_size
            .unwrap_or((self.index.bulk_size * 5) as i64);
        QueueCapacity::from_throttle_size(size)
    }

    /// Basic auth credentials, when both user and password are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.couchdb.user, &self.couchdb.password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }
}

/// Serde helpers for durations in `humantime` form (`"10ms"`, `"5s"`,
/// `"2m"`, `"1h 30m"`) or as a bare number of milliseconds.
pub mod duration_str {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    /// Parse a duration string. A bare integer is milliseconds.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Ok(ms) = s.parse::<u64>() {
            return Ok(Duration::from_millis(ms));
        }
        humantime::parse_duration(s).map_err(|e| format!("invalid duration '{s}': {e}"))
    }

    /// Format a duration the way [`parse`] reads it.
    pub fn format(d: &Duration) -> String {
        humantime::format_duration(*d).to_string()
    }

    pub(crate) fn from_value<E: de::Error>(v: Value) -> Result<Duration, E> {
        match v {
            Value::String(s) => parse(&s).map_err(E::custom),
            Value::Number(n) => n
                .as_u64()
                .map(Duration::from_millis)
                .ok_or_else(|| E::custom(format!("invalid duration {n}"))),
            other => Err(E::custom(format!("invalid duration {other}"))),
        }
    }

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        from_value(Value::deserialize(d)?)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};
        use serde_json::Value;

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => s.serialize_str(&super::format(d)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            match Option::<Value>::deserialize(d)? {
                None | Some(Value::Null) => Ok(None),
                Some(v) => super::from_value(v).map(Some),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_river_name() {
        let cfg = RiverConfig::new("orders");
        assert_eq!(cfg.db(), "orders");
        assert_eq!(cfg.index_name(), "orders");
        assert_eq!(cfg.type_name(), "orders");
        assert_eq!(cfg.couchdb.port, 5984);
        assert_eq!(cfg.read_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.queue_capacity().unwrap(), QueueCapacity::Bounded(500));
        assert_eq!(cfg.index.bulk_timeout, Duration::from_millis(10));
        assert_eq!(cfg.couchdb.backoff, Duration::from_secs(5));
    }

    #[test]
    fn parses_settings_document() {
        let cfg = RiverConfig::from_json_str(
            r#"{
                "name": "my_river",
                "couchdb": {
                    "host": "couch.local",
                    "db": "orders",
                    "filter": "app/active",
                    "filter_params": {"status": "open", "limit": 3},
                    "user": "admin",
                    "password": "secret",
                    "heartbeat": "2s"
                },
                "index": {
                    "type": "order",
                    "bulk_size": 50,
                    "bulk_timeout": "25ms",
                    "throttle_size": -1
                }
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.db(), "orders");
        assert_eq!(cfg.index_name(), "orders");
        assert_eq!(cfg.type_name(), "order");
        assert_eq!(cfg.read_timeout(), Duration::from_secs(6));
        assert_eq!(cfg.index.bulk_timeout, Duration::from_millis(25));
        assert_eq!(cfg.queue_capacity().unwrap(), QueueCapacity::Unbounded);
        assert_eq!(cfg.credentials(), Some(("admin", "secret")));
        assert_eq!(cfg.couchdb.filter_params.len(), 2);
    }

    #[test]
    fn explicit_read_timeout_wins() {
        let cfg = RiverConfig::from_json_str(
            r#"{"name": "r", "couchdb": {"heartbeat": "10s", "read_timeout": 1500}}"#,
        )
        .unwrap();
        assert_eq!(cfg.read_timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn rejects_bad_throttle_size() {
        assert!(QueueCapacity::from_throttle_size(0).is_err());
        assert!(QueueCapacity::from_throttle_size(-5).is_err());
        let err = RiverConfig::from_json_str(r#"{"name": "r", "index": {"throttle_size": 0}}"#)
            .unwrap_err();
        assert!(matches!(err, RiverError::Config(_)));
    }

    #[test]
    fn duration_strings() {
        assert_eq!(duration_str::parse("10ms").unwrap(), Duration::from_millis(10));
        assert_eq!(duration_str::parse("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(duration_str::parse("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(duration_str::parse("1h 30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(duration_str::parse(" 1s 500ms ").unwrap(), Duration::from_millis(1500));
        assert_eq!(duration_str::parse("250").unwrap(), Duration::from_millis(250));
        assert!(duration_str::parse("5 fortnights").is_err());
        assert!(duration_str::parse("99999999999999999999999h").is_err());
        assert_eq!(duration_str::format(&Duration::from_secs(5)), "5s");
        assert_eq!(duration_str::format(&Duration::from_millis(10)), "10ms");
        assert_eq!(duration_str::format(&Duration::from_millis(1500)), "1s 500ms");
    }

    #[test]
    fn huge_heartbeat_is_rejected_not_overflowed() {
        let mut cfg = RiverConfig::new("r");
        cfg.couchdb.heartbeat = Duration::from_secs(u64::MAX / 2);
        assert!(matches!(cfg.validate(), Err(RiverError::Config(_))));
        assert_eq!(cfg.read_timeout(), Duration::MAX);

        let raw = serde_json::json!({
            "name": "r",
            "couchdb": {"heartbeat": duration_str::format(&cfg.couchdb.heartbeat)},
        });
        let err = RiverConfig::from_json_str(&raw.to_string()).unwrap_err();
        assert!(matches!(err, RiverError::Config(_)));

        // An explicit read timeout makes the heartbeat's size irrelevant.
        cfg.couchdb.read_timeout = Some(Duration::from_secs(60));
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.read_timeout(), Duration::from_secs(60));
    }
}
