//! Bulk sink contract: where mutations go.
//!
//! A sink accepts mutations without blocking the mutator, batches them by
//! its own count/time/concurrency rules and flushes asynchronously.
//! Outcomes are reported to a [`BulkListener`]; the river only logs them.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::RiverError;
use crate::types::Mutation;

/// Trait for write sinks.
#[async_trait]
pub trait BulkSink: Send + Sync {
    /// Hand a mutation to the sink. Must not wait on I/O.
    fn submit(&self, mutation: Mutation) -> Result<(), RiverError>;

    /// Flush everything still buffered and stop accepting mutations.
    async fn close(&self) -> Result<(), RiverError> {
        Ok(())
    }
}

/// A failed item within an otherwise executed bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemFailure {
    pub index: String,
    pub doc_type: String,
    pub id: String,
    pub action: String,
    pub reason: String,
}

/// Callbacks around each bulk execution.
pub trait BulkListener: Send + Sync {
    fn before_bulk(&self, execution_id: u64, actions: usize);

    /// The request executed; `failures` lists items the engine rejected.
    fn after_bulk(&self, execution_id: u64, actions: usize, failures: &[BulkItemFailure]);

    /// The request as a whole failed.
    fn bulk_failed(&self, execution_id: u64, actions: usize, error: &RiverError);
}

/// Listener that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl BulkListener for LoggingListener {
    fn before_bulk(&self, execution_id: u64, actions: usize) {
        tracing::debug!(execution_id, actions, "going to execute new bulk");
    }

    fn after_bulk(&self, execution_id: u64, actions: usize, failures: &[BulkItemFailure]) {
        tracing::debug!(execution_id, actions, "executed bulk");
        if !failures.is_empty() {
            tracing::warn!(
                execution_id,
                failed = failures.len(),
                "there were failures while executing bulk"
            );
            for f in failures {
                tracing::debug!(
                    index = %f.index,
                    doc_type = %f.doc_type,
                    id = %f.id,
                    action = %f.action,
                    reason = %f.reason,
                    "bulk item failed"
                );
            }
        }
    }

    fn bulk_failed(&self, execution_id: u64, actions: usize, error: &RiverError) {
        tracing::warn!(execution_id, actions, error = %error, "error executing bulk");
    }
}

// ─── In-memory sink (for testing) ─────────────────────────────────────────────

/// Sink that keeps every submitted mutation in memory.
#[derive(Default)]
pub struct MemorySink {
    mutations: Mutex<Vec<Mutation>>,
    closed: Mutex<bool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything submitted so far.
    pub fn mutations(&self) -> Vec<Mutation> {
        lock(&self.mutations).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.mutations).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        *lock(&self.closed)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl BulkSink for MemorySink {
    fn submit(&self, mutation: Mutation) -> Result<(), RiverError> {
        if *lock(&self.closed) {
            return Err(RiverError::Sink("sink is closed".into()));
        }
        lock(&self.mutations).push(mutation);
        Ok(())
    }

    async fn close(&self) -> Result<(), RiverError> {
        *lock(&self.closed) = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delete(id: &str) -> Mutation {
        Mutation::Delete {
            index: "i".into(),
            doc_type: "t".into(),
            id: id.into(),
            routing: None,
            parent: None,
        }
    }

    #[tokio::test]
    async fn memory_sink_records_until_closed() {
        let sink = MemorySink::new();
        sink.submit(delete("a")).unwrap();
        sink.submit(delete("b")).unwrap();
        assert_eq!(sink.len(), 2);

        sink.close().await.unwrap();
        assert!(sink.is_closed());
        assert!(sink.submit(delete("c")).is_err());
        assert_eq!(sink.mutations()[1].id(), "b");
    }
}
