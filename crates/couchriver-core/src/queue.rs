//! `ChangeQueue`: the hand-off between the feed reader and the mutator.
//!
//! A bounded queue makes a slow indexer stall the network read: `put`
//! waits while the queue is full. An unbounded queue never waits.
//! Every blocking call races the shutdown token and returns
//! [`RiverError::Shutdown`] as soon as it fires.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::QueueCapacity;
use crate::error::RiverError;

/// Constructor for the sender/receiver pair.
pub struct ChangeQueue;

impl ChangeQueue {
    /// Create a queue with the given capacity.
    pub fn new(capacity: QueueCapacity, shutdown: CancellationToken) -> (QueueSender, QueueReceiver) {
        match capacity {
            QueueCapacity::Bounded(n) => {
                let (tx, rx) = mpsc::channel(n.max(1));
                (
                    QueueSender { inner: SenderInner::Bounded(tx), shutdown: shutdown.clone() },
                    QueueReceiver { inner: ReceiverInner::Bounded(rx), shutdown },
                )
            }
            QueueCapacity::Unbounded => {
                let (tx, rx) = mpsc::unbounded_channel();
                (
                    QueueSender { inner: SenderInner::Unbounded(tx), shutdown: shutdown.clone() },
                    QueueReceiver { inner: ReceiverInner::Unbounded(rx), shutdown },
                )
            }
        }
    }
}

enum SenderInner {
    Bounded(mpsc::Sender<String>),
    Unbounded(mpsc::UnboundedSender<String>),
}

enum ReceiverInner {
    Bounded(mpsc::Receiver<String>),
    Unbounded(mpsc::UnboundedReceiver<String>),
}

/// Producer half, owned by the feed reader.
pub struct QueueSender {
    inner: SenderInner,
    shutdown: CancellationToken,
}

impl QueueSender {
    /// Enqueue a raw line, waiting while the queue is full.
    pub async fn put(&self, line: String) -> Result<(), RiverError> {
        if self.shutdown.is_cancelled() {
            return Err(RiverError::Shutdown);
        }
        match &self.inner {
            SenderInner::Bounded(tx) => tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Err(RiverError::Shutdown),
                res = tx.send(line) => res.map_err(|_| RiverError::Shutdown),
            },
            SenderInner::Unbounded(tx) => tx.send(line).map_err(|_| RiverError::Shutdown),
        }
    }

    /// Number of free slots, `None` for an unbounded queue.
    pub fn available(&self) -> Option<usize> {
        match &self.inner {
            SenderInner::Bounded(tx) => Some(tx.capacity()),
            SenderInner::Unbounded(_) => None,
        }
    }
}

/// Consumer half, owned by the mutator.
pub struct QueueReceiver {
    inner: ReceiverInner,
    shutdown: CancellationToken,
}

impl QueueReceiver {
    /// Dequeue the next line, waiting while the queue is empty.
    pub async fn take(&mut self) -> Result<String, RiverError> {
        if self.shutdown.is_cancelled() {
            return Err(RiverError::Shutdown);
        }
        let shutdown = self.shutdown.clone();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(RiverError::Shutdown),
            line = self.recv() => line.ok_or(RiverError::Shutdown),
        }
    }

    /// Dequeue a line if one arrives within `wait`.
    ///
    /// `Ok(None)` means the wait elapsed with nothing to take.
    pub async fn poll(&mut self, wait: Duration) -> Result<Option<String>, RiverError> {
        let shutdown = self.shutdown.clone();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(RiverError::Shutdown),
            res = tokio::time::timeout(wait, self.recv()) => match res {
                Ok(Some(line)) => Ok(Some(line)),
                // Sender gone: the reader has exited.
                Ok(None) => Err(RiverError::Shutdown),
                Err(_) => Ok(None),
            },
        }
    }

    async fn recv(&mut self) -> Option<String> {
        match &mut self.inner {
            ReceiverInner::Bounded(rx) => rx.recv().await,
            ReceiverInner::Unbounded(rx) => rx.recv().await,
        }
    }
}
