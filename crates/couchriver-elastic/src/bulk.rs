//! Bulk sink: coalesce mutations into `_bulk` requests.
//!
//! `submit` only pushes onto a channel. A background task collects actions
//! and executes a bulk request when `bulk_size` actions are pending or when
//! `flush_interval` elapses with anything pending. At most
//! `max_concurrent_bulk` requests are in flight; when all permits are taken
//! the collector waits, and the channel absorbs new submissions meanwhile.
//! With `max_concurrent_bulk == 0` each request runs inline in the collector.
//!
//! The channel is unbounded because `submit` never waits. While the engine
//! lags, mutations the mutator keeps producing pile up here; the memory
//! this can take is bounded only by how far the feed runs ahead of indexing.
//!
//! # Usage
//! ```rust,no_run
//! use std::sync::Arc;
//! use couchriver_core::sink::LoggingListener;
//! use couchriver_elastic::{BulkSettings, EsBulkSink, EsClient, EsConfig};
//!
//! # fn example() -> Result<(), couchriver_elastic::EsError> {
//! let client = Arc::new(EsClient::new(&EsConfig::default())?);
//! let sink = EsBulkSink::new(client, BulkSettings::default(), Arc::new(LoggingListener));
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use couchriver_core::sink::{BulkItemFailure, BulkListener};
use couchriver_core::{BulkSink, Mutation, RiverConfig, RiverError};
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use crate::client::EsClient;

/// Flush thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkSettings {
    pub bulk_size: usize,
    pub flush_interval: Duration,
    pub max_concurrent_bulk: usize,
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self {
            bulk_size: 100,
            flush_interval: Duration::from_secs(5),
            max_concurrent_bulk: 1,
        }
    }
}

impl BulkSettings {
    pub fn from_river(cfg: &RiverConfig) -> Self {
        Self {
            bulk_size: cfg.index.bulk_size.max(1),
            flush_interval: cfg.index.flush_interval,
            max_concurrent_bulk: cfg.index.max_concurrent_bulk,
        }
    }
}

/// [`BulkSink`] writing to Elasticsearch's `_bulk` endpoint.
pub struct EsBulkSink {
    /// Unbounded: see the module docs.
    tx: Mutex<Option<mpsc::UnboundedSender<Mutation>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl EsBulkSink {
    /// Create the sink and spawn its collector task.
    pub fn new(client: Arc<EsClient>, settings: BulkSettings, listener: Arc<dyn BulkListener>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(collect_loop(rx, client, settings, listener));
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl BulkSink for EsBulkSink {
    fn submit(&self, mutation: Mutation) -> Result<(), RiverError> {
        let tx = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        match tx.as_ref() {
            Some(tx) => tx
                .send(mutation)
                .map_err(|_| RiverError::Sink("bulk collector stopped".into())),
            None => Err(RiverError::Sink("bulk sink is closed".into())),
        }
    }

    /// Flush pending actions and wait for in-flight requests.
    async fn close(&self) -> Result<(), RiverError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Dropping the sender ends the collector once the channel drains.
        drop(self.tx.lock().unwrap_or_else(|p| p.into_inner()).take());
        let worker = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(worker) = worker {
            worker
                .await
                .map_err(|e| RiverError::Sink(format!("bulk collector panicked: {e}")))?;
        }
        Ok(())
    }
}

async fn collect_loop(
    mut rx: mpsc::UnboundedReceiver<Mutation>,
    client: Arc<EsClient>,
    settings: BulkSettings,
    listener: Arc<dyn BulkListener>,
) {
    let permits = Arc::new(Semaphore::new(settings.max_concurrent_bulk.max(1)));
    let mut in_flight = JoinSet::new();
    let mut pending: Vec<Mutation> = Vec::with_capacity(settings.bulk_size);
    let mut execution_id = 0u64;

    let mut ticker = time::interval(settings.flush_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        let flush = tokio::select! {
            item = rx.recv() => match item {
                Some(m) => {
                    pending.push(m);
                    pending.len() >= settings.bulk_size
                }
                None => break,
            },
            _ = ticker.tick() => !pending.is_empty(),
            Some(res) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = res {
                    warn!(error = %e, "bulk request task failed");
                }
                false
            }
        };
        if !flush {
            continue;
        }

        execution_id += 1;
        let batch = std::mem::replace(&mut pending, Vec::with_capacity(settings.bulk_size));
        if settings.max_concurrent_bulk == 0 {
            execute(&client, listener.as_ref(), execution_id, batch).await;
            continue;
        }
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let client = Arc::clone(&client);
        let listener = Arc::clone(&listener);
        in_flight.spawn(async move {
            execute(&client, listener.as_ref(), execution_id, batch).await;
            drop(permit);
        });
    }

    if !pending.is_empty() {
        execution_id += 1;
        execute(&client, listener.as_ref(), execution_id, pending).await;
    }
    while let Some(res) = in_flight.join_next().await {
        if let Err(e) = res {
            warn!(error = %e, "bulk request task failed");
        }
    }
    debug!(executions = execution_id, "bulk sink closed");
}

async fn execute(client: &EsClient, listener: &dyn BulkListener, execution_id: u64, batch: Vec<Mutation>) {
    let actions = batch.len();
    listener.before_bulk(execution_id, actions);
    let result = match bulk_body(&batch) {
        Ok(body) => client.bulk(body).await.map_err(|e| RiverError::Sink(e.to_string())),
        Err(e) => Err(e),
    };
    match result {
        Ok(response) => listener.after_bulk(execution_id, actions, &item_failures(&response)),
        Err(e) => listener.bulk_failed(execution_id, actions, &e),
    }
}

/// Render mutations as an NDJSON `_bulk` body.
pub fn bulk_body(batch: &[Mutation]) -> Result<String, RiverError> {
    let mut body = String::new();
    for m in batch {
        let mut meta = Map::new();
        meta.insert("_index".into(), json!(m.index()));
        meta.insert("_type".into(), json!(m.doc_type()));
        meta.insert("_id".into(), json!(m.id()));
        if let Some(routing) = m.routing() {
            meta.insert("routing".into(), json!(routing));
        }
        if let Some(parent) = m.parent() {
            meta.insert("parent".into(), json!(parent));
        }
        let mut header = Map::new();
        header.insert(m.action().into(), Value::Object(meta));
        push_line(&mut body, &Value::Object(header))?;

        if let Mutation::Upsert { document, .. } = m {
            push_line(&mut body, document)?;
        }
    }
    Ok(body)
}

fn push_line(body: &mut String, value: &impl serde::Serialize) -> Result<(), RiverError> {
    let line = serde_json::to_string(value).map_err(|e| RiverError::Sink(e.to_string()))?;
    body.push_str(&line);
    body.push('\n');
    Ok(())
}

/// Items the engine rejected, from a `_bulk` response.
pub fn item_failures(response: &Value) -> Vec<BulkItemFailure> {
    if response.get("errors").and_then(Value::as_bool) == Some(false) {
        return Vec::new();
    }
    let Some(items) = response.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut failures = Vec::new();
    for item in items {
        let Some((action, result)) = item.as_object().and_then(|o| o.iter().next()) else {
            continue;
        };
        let Some(error) = result.get("error") else {
            continue;
        };
        let reason = match error {
            Value::String(s) => s.clone(),
            other => other
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        };
        let field = |name: &str| {
            result
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        failures.push(BulkItemFailure {
            index: field("_index"),
            doc_type: field("_type"),
            id: field("_id"),
            action: action.clone(),
            reason,
        });
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EsConfig;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct Recorder {
        before: Mutex<Vec<(u64, usize)>>,
        failures: Mutex<Vec<BulkItemFailure>>,
        failed: Mutex<Vec<String>>,
    }

    impl BulkListener for Recorder {
        fn before_bulk(&self, id: u64, actions: usize) {
            self.before.lock().unwrap().push((id, actions));
        }
        fn after_bulk(&self, _id: u64, _actions: usize, failures: &[BulkItemFailure]) {
            self.failures.lock().unwrap().extend_from_slice(failures);
        }
        fn bulk_failed(&self, _id: u64, _actions: usize, error: &RiverError) {
            self.failed.lock().unwrap().push(error.to_string());
        }
    }

    fn upsert(id: &str) -> Mutation {
        Mutation::Upsert {
            index: "db".into(),
            doc_type: "db".into(),
            id: id.into(),
            document: json!({"n": id}).as_object().cloned().unwrap(),
            routing: None,
            parent: None,
        }
    }

    fn delete(id: &str) -> Mutation {
        Mutation::Delete {
            index: "db".into(),
            doc_type: "db".into(),
            id: id.into(),
            routing: Some("r1".into()),
            parent: Some("p1".into()),
        }
    }

    async fn es_sink(server: &MockServer, settings: BulkSettings) -> (EsBulkSink, Arc<Recorder>) {
        let client = EsClient::new(&EsConfig {
            url: server.uri(),
            ..EsConfig::default()
        })
        .unwrap();
        let recorder = Arc::new(Recorder::default());
        (EsBulkSink::new(Arc::new(client), settings, recorder.clone()), recorder)
    }

    async fn ok_bulk(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-type", "application/x-ndjson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errors": false, "items": []})))
            .mount(server)
            .await;
    }

    async fn bodies(server: &MockServer) -> Vec<String> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .collect()
    }

    #[test]
    fn body_has_action_and_source_lines() {
        let body = bulk_body(&[upsert("a"), delete("b")]).unwrap();
        let lines: Vec<Value> = body.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], json!({"index": {"_index": "db", "_type": "db", "_id": "a"}}));
        assert_eq!(lines[1], json!({"n": "a"}));
        assert_eq!(
            lines[2],
            json!({"delete": {"_index": "db", "_type": "db", "_id": "b", "routing": "r1", "parent": "p1"}})
        );
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn parses_item_failures() {
        let resp = json!({
            "errors": true,
            "items": [
                {"index": {"_index": "db", "_type": "db", "_id": "a", "status": 201}},
                {"index": {"_index": "db", "_type": "db", "_id": "b", "status": 400,
                           "error": {"type": "mapper_parsing_exception", "reason": "failed to parse"}}},
                {"delete": {"_index": "db", "_type": "db", "_id": "c", "status": 500,
                            "error": "EsRejectedExecutionException"}}
            ]
        });
        let failures = item_failures(&resp);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].id, "b");
        assert_eq!(failures[0].reason, "failed to parse");
        assert_eq!(failures[1].action, "delete");
        assert_eq!(failures[1].reason, "EsRejectedExecutionException");
    }

    #[tokio::test]
    async fn flushes_when_bulk_size_reached() {
        let server = MockServer::start().await;
        ok_bulk(&server).await;
        let (sink, recorder) = es_sink(
            &server,
            BulkSettings {
                bulk_size: 2,
                flush_interval: Duration::from_secs(3600),
                max_concurrent_bulk: 1,
            },
        )
        .await;

        sink.submit(upsert("a")).unwrap();
        sink.submit(upsert("b")).unwrap();
        for _ in 0..200 {
            if !bodies(&server).await.is_empty() {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        let sent = bodies(&server).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].lines().count(), 4);
        assert_eq!(*recorder.before.lock().unwrap(), vec![(1, 2)]);
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn flush_interval_sends_partial_batch() {
        let server = MockServer::start().await;
        ok_bulk(&server).await;
        let (sink, _) = es_sink(
            &server,
            BulkSettings {
                bulk_size: 100,
                flush_interval: Duration::from_millis(50),
                max_concurrent_bulk: 0,
            },
        )
        .await;

        sink.submit(delete("x")).unwrap();
        for _ in 0..200 {
            if !bodies(&server).await.is_empty() {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(bodies(&server).await.len(), 1);
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn submit_does_not_wait_for_busy_permits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"errors": false, "items": []}))
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&server)
            .await;
        let (sink, recorder) = es_sink(
            &server,
            BulkSettings {
                bulk_size: 10,
                flush_interval: Duration::from_secs(3600),
                max_concurrent_bulk: 1,
            },
        )
        .await;

        let started = std::time::Instant::now();
        for n in 0..50 {
            sink.submit(upsert(&n.to_string())).unwrap();
        }
        assert!(started.elapsed() < Duration::from_millis(100), "submit waited on a request");

        sink.close().await.unwrap();
        let sent = bodies(&server).await;
        assert_eq!(sent.len(), 5);
        assert_eq!(sent.iter().map(|b| b.lines().count()).sum::<usize>(), 100);
        assert_eq!(recorder.before.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn close_flushes_pending_and_rejects_new_work() {
        let server = MockServer::start().await;
        ok_bulk(&server).await;
        let (sink, _) = es_sink(
            &server,
            BulkSettings {
                bulk_size: 100,
                flush_interval: Duration::from_secs(3600),
                max_concurrent_bulk: 1,
            },
        )
        .await;

        for id in ["a", "b", "c"] {
            sink.submit(upsert(id)).unwrap();
        }
        sink.close().await.unwrap();

        let sent = bodies(&server).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].lines().count(), 6);
        assert!(matches!(sink.submit(upsert("d")), Err(RiverError::Sink(_))));
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn reports_item_and_request_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": true,
                "items": [{"index": {"_index": "db", "_type": "db", "_id": "a", "status": 400,
                                     "error": {"reason": "bad field"}}}]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let (sink, recorder) = es_sink(
            &server,
            BulkSettings {
                bulk_size: 1,
                flush_interval: Duration::from_secs(3600),
                max_concurrent_bulk: 0,
            },
        )
        .await;
        sink.submit(upsert("a")).unwrap();
        sink.submit(upsert("b")).unwrap();
        sink.close().await.unwrap();

        let failures = recorder.failures.lock().unwrap().clone();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].reason, "bad field");
        let failed = recorder.failed.lock().unwrap().clone();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].contains("503"));
        assert_eq!(*recorder.before.lock().unwrap(), vec![(1, 1), (2, 1)]);
    }
}
