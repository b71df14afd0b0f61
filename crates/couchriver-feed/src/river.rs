//! `River`: runs one feed reader and one mutator over a shared queue.
//!
//! `start` spawns the indexer task first and the slurper second. `close`
//! fires the shutdown token (which unblocks both tasks at whatever they
//! are waiting on) and then closes the sink so it flushes what it holds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use couchriver_core::{
    BulkSink, CancellationToken, ChangeQueue, CheckpointManager, CheckpointStore, Mutator,
    MutatorConfig, RiverConfig, RiverError, TransformHook,
};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::client::FeedSource;
use crate::reader::{FeedReader, FeedStats};

pub struct River {
    config: RiverConfig,
    source: Arc<dyn FeedSource>,
    sink: Arc<dyn BulkSink>,
    store: Arc<dyn CheckpointStore>,
    transform: Option<Arc<dyn TransformHook>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    stats: Option<Arc<FeedStats>>,
    slurper: Option<JoinHandle<()>>,
    indexer: Option<JoinHandle<()>>,
}

impl River {
    pub fn new(
        config: RiverConfig,
        source: Arc<dyn FeedSource>,
        sink: Arc<dyn BulkSink>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config,
            source,
            sink,
            store,
            transform: None,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            stats: None,
            slurper: None,
            indexer: None,
        }
    }

    pub fn with_transform(mut self, hook: Arc<dyn TransformHook>) -> Self {
        self.transform = Some(hook);
        self
    }

    pub fn config(&self) -> &RiverConfig {
        &self.config
    }

    /// Token observed by both tasks. Cancelling it is equivalent to `close`
    /// minus the sink flush.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Reader counters, once started.
    pub fn stats(&self) -> Option<Arc<FeedStats>> {
        self.stats.clone()
    }

    /// Spawn the indexer and slurper tasks.
    pub fn start(&mut self) -> Result<(), RiverError> {
        if self.slurper.is_some() || self.closed.load(Ordering::SeqCst) {
            return Err(RiverError::Other(format!("river [{}] already started", self.config.name)));
        }
        self.config.validate()?;

        info!(
            endpoint = %self.source.endpoint(),
            filter = ?self.config.couchdb.filter,
            db = %self.config.db(),
            index = %self.config.index_name(),
            doc_type = %self.config.type_name(),
            "starting couchdb stream"
        );

        let checkpoint = CheckpointManager::new(Arc::clone(&self.store), self.config.name.clone());
        let (tx, rx) = ChangeQueue::new(self.config.queue_capacity()?, self.shutdown.clone());

        let mut mutator = Mutator::new(
            MutatorConfig::from_river(&self.config),
            Arc::clone(&self.sink),
            checkpoint.clone(),
            self.shutdown.clone(),
        );
        if let Some(hook) = &self.transform {
            mutator = mutator.with_transform(Arc::clone(hook));
        }

        let reader = FeedReader::new(Arc::clone(&self.source), checkpoint, tx, self.shutdown.clone())
            .configured(&self.config);
        self.stats = Some(reader.stats());

        self.indexer = Some(tokio::spawn(mutator.run(rx)));
        self.slurper = Some(tokio::spawn(reader.run()));
        Ok(())
    }

    /// Signal shutdown and close the sink. Calling it again does nothing.
    pub async fn close(&self) -> Result<(), RiverError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(river = %self.config.name, "closing couchdb stream river");
        self.shutdown.cancel();
        self.sink.close().await
    }

    /// Wait for both tasks to finish.
    pub async fn join(&mut self) {
        for (name, handle) in [("slurper", self.slurper.take()), ("indexer", self.indexer.take())] {
            if let Some(handle) = handle {
                if let Err(e) = handle.await {
                    warn!(task = name, error = %e, "river task panicked");
                }
            }
        }
    }

    /// `close` followed by `join`.
    pub async fn stop(&mut self) -> Result<(), RiverError> {
        let res = self.close().await;
        self.join().await;
        res
    }
}
