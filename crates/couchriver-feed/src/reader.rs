//! The feed reader: keeps a `_changes` stream open and feeds the queue.
//!
//! ```text
//! Connecting ──► Streaming ──► Backoff ──► Connecting ...
//!      │              │           │
//!      └──────────────┴───────────┴──► Closed   (shutdown)
//! ```
//!
//! Each connect reloads the checkpoint, so a position saved while the
//! previous connection was alive is honored. A blank line is a heartbeat.
//! Any other line is put on the queue, waiting while the queue is full;
//! that wait is what slows the network read down when indexing lags.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use couchriver_core::{CancellationToken, CheckpointManager, QueueSender, RiverConfig, RiverError};
use futures::StreamExt;
use tracing::{debug, info, trace, warn};

use crate::client::FeedSource;
use crate::error::FeedError;

/// Reader lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Connecting,
    Streaming,
    Backoff,
    Closed,
}

impl std::fmt::Display for ReaderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Streaming => write!(f, "streaming"),
            Self::Backoff => write!(f, "backoff"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Counters kept by the reader.
#[derive(Debug, Default)]
pub struct FeedStats {
    connections: AtomicU64,
    lines: AtomicU64,
    heartbeats: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`FeedStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections: u64,
    pub lines: u64,
    pub heartbeats: u64,
    pub failures: u64,
}

impl FeedStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            lines: self.lines.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Producer side of the river.
pub struct FeedReader {
    source: Arc<dyn FeedSource>,
    checkpoint: CheckpointManager,
    queue: QueueSender,
    shutdown: CancellationToken,
    read_timeout: Duration,
    backoff: Duration,
    stats: Arc<FeedStats>,
    state: ReaderState,
}

impl FeedReader {
    pub fn new(
        source: Arc<dyn FeedSource>,
        checkpoint: CheckpointManager,
        queue: QueueSender,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            checkpoint,
            queue,
            shutdown,
            read_timeout: Duration::from_secs(30),
            backoff: Duration::from_secs(5),
            stats: Arc::new(FeedStats::default()),
            state: ReaderState::Connecting,
        }
    }

    /// Take read timeout and backoff from the river configuration.
    pub fn configured(mut self, cfg: &RiverConfig) -> Self {
        self.read_timeout = cfg.read_timeout();
        self.backoff = cfg.couchdb.backoff;
        self
    }

    pub fn read_timeout(mut self, d: Duration) -> Self {
        self.read_timeout = d;
        self
    }

    pub fn backoff(mut self, d: Duration) -> Self {
        self.backoff = d;
        self
    }

    /// Shared handle to the reader's counters.
    pub fn stats(&self) -> Arc<FeedStats> {
        Arc::clone(&self.stats)
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Run until shutdown.
    pub async fn run(mut self) {
        while !self.shutdown.is_cancelled() {
            self.set_state(ReaderState::Connecting);

            let since = match self.load_checkpoint().await {
                Ok(since) => since,
                Err(e) if e.is_shutdown() => break,
                Err(e) => {
                    warn!(error = %e, "failed to get last_seq, throttling");
                    if !self.pause().await {
                        break;
                    }
                    continue;
                }
            };

            match self.stream(since.as_deref()).await {
                Ok(()) => debug!(endpoint = %self.source.endpoint(), "_changes stream ended"),
                Err(e) if e.is_shutdown() => break,
                Err(e) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "failed to read from _changes, throttling");
                }
            }

            if self.shutdown.is_cancelled() || !self.pause().await {
                break;
            }
        }
        self.set_state(ReaderState::Closed);
        info!("slurper stopped");
    }

    async fn load_checkpoint(&self) -> Result<Option<String>, RiverError> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(RiverError::Shutdown),
            res = self.checkpoint.load() => res,
        }
    }

    /// One connection: open, then forward lines until the stream ends or fails.
    async fn stream(&mut self, since: Option<&str>) -> Result<(), RiverError> {
        let timeout_ms = self.read_timeout.as_millis() as u64;

        // The read timeout also covers waiting for the response headers.
        let opened = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(RiverError::Shutdown),
            res = tokio::time::timeout(self.read_timeout, self.source.open(since)) => res,
        };
        let mut lines = match opened {
            Ok(res) => res?,
            Err(_) => return Err(FeedError::Timeout { ms: timeout_ms }.into()),
        };
        self.stats.connections.fetch_add(1, Ordering::Relaxed);
        self.set_state(ReaderState::Streaming);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(RiverError::Shutdown),
                next = tokio::time::timeout(self.read_timeout, lines.next()) => next,
            };

            let line = match next {
                Err(_) => return Err(FeedError::Timeout { ms: timeout_ms }.into()),
                Ok(None) => return Ok(()),
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(Some(Ok(line))) => line,
            };

            if line.trim().is_empty() {
                self.stats.heartbeats.fetch_add(1, Ordering::Relaxed);
                trace!("[couchdb] heartbeat");
                continue;
            }

            trace!(line = %line, "[couchdb]");
            self.stats.lines.fetch_add(1, Ordering::Relaxed);
            self.queue.put(line).await?;
        }
    }

    /// Sleep for the backoff interval; `false` if shutdown cut it short.
    async fn pause(&mut self) -> bool {
        self.set_state(ReaderState::Backoff);
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.backoff) => true,
        }
    }

    fn set_state(&mut self, state: ReaderState) {
        if self.state != state {
            trace!(from = %self.state, to = %state, "feed reader state");
            self.state = state;
        }
    }
}
