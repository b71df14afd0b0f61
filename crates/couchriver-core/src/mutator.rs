//! The mutator: drains the change queue, turns changes into mutations and
//! advances the checkpoint.
//!
//! # Batch loop
//! 1. Wait for one line.
//! 2. Keep taking lines while each arrives within `bulk_timeout`.
//! 3. Every line goes through [`Mutator::process_line`]; the last token
//!    returned in the batch is the batch's checkpoint.
//! 4. Save that checkpoint.
//!
//! Mutations go to the sink as soon as they are derived. The sink flushes
//! on its own schedule, so a checkpoint can be saved before the matching
//! writes are durable; replaying from an older checkpoint is harmless
//! because upserts and deletes are idempotent.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::checkpoint::CheckpointManager;
use crate::config::RiverConfig;
use crate::error::RiverError;
use crate::queue::QueueReceiver;
use crate::sink::BulkSink;
use crate::token::SequenceToken;
use crate::transform::TransformHook;
use crate::types::{ChangeEvent, Mutation, ATTACHMENTS_FIELD};

/// Settings the mutator needs from the river configuration.
#[derive(Debug, Clone)]
pub struct MutatorConfig {
    /// Index used when a change has no `_index` override.
    pub index: String,
    /// Type used when a change has no `_type` override.
    pub doc_type: String,
    /// Strip `_attachments` from documents before indexing.
    pub ignore_attachments: bool,
    /// Per-poll wait while coalescing a batch.
    pub bulk_timeout: Duration,
}

impl MutatorConfig {
    pub fn from_river(cfg: &RiverConfig) -> Self {
        Self {
            index: cfg.index_name().to_string(),
            doc_type: cfg.type_name().to_string(),
            ignore_attachments: cfg.couchdb.ignore_attachments,
            bulk_timeout: cfg.index.bulk_timeout,
        }
    }
}

/// Consumer side of the river.
pub struct Mutator {
    config: MutatorConfig,
    sink: Arc<dyn BulkSink>,
    checkpoint: CheckpointManager,
    transform: Option<Arc<dyn TransformHook>>,
    shutdown: CancellationToken,
}

impl Mutator {
    pub fn new(
        config: MutatorConfig,
        sink: Arc<dyn BulkSink>,
        checkpoint: CheckpointManager,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            sink,
            checkpoint,
            transform: None,
            shutdown,
        }
    }

    /// Install a transform applied to every non-design change.
    pub fn with_transform(mut self, hook: Arc<dyn TransformHook>) -> Self {
        self.transform = Some(hook);
        self
    }

    /// Run until shutdown.
    pub async fn run(self, mut queue: QueueReceiver) {
        loop {
            match self.process_batch(&mut queue).await {
                Ok(_) => {}
                Err(e) if e.is_shutdown() => break,
                Err(e) => warn!(error = %e, "failed to save checkpoint"),
            }
        }
        info!("indexer stopped");
    }

    /// Process one batch and save its checkpoint.
    ///
    /// Returns the checkpoint written, or `None` when no line in the batch
    /// produced a token. Fails with [`RiverError::Shutdown`] when the
    /// shutdown signal interrupts the batch; its checkpoint is then not saved.
    pub async fn process_batch(
        &self,
        queue: &mut QueueReceiver,
    ) -> Result<Option<String>, RiverError> {
        let first = queue.take().await?;
        let mut last_seq = self.process_line(&first);
        let mut lines = 1usize;

        // Spin a bit to see if more changes are coming.
        while let Some(line) = queue.poll(self.config.bulk_timeout).await? {
            lines += 1;
            if let Some(seq) = self.process_line(&line) {
                last_seq = Some(seq);
            }
        }

        let Some(seq) = last_seq else {
            debug!(lines, "batch produced no checkpoint");
            return Ok(None);
        };

        if self.shutdown.is_cancelled() {
            warn!(
                key = %self.checkpoint.key(),
                last_seq = %seq,
                "river was closing while trying to update sequence, operation skipped"
            );
            return Err(RiverError::Shutdown);
        }

        let written = self.checkpoint.save(&seq).await?;
        debug!(lines, last_seq = %written, "batch complete");
        Ok(Some(written))
    }

    /// Handle one feed line and return its token.
    ///
    /// `None` means the line must not move the checkpoint: it did not parse,
    /// carried an error, had no id, or arrived during shutdown.
    pub fn process_line(&self, line: &str) -> Option<SequenceToken> {
        let record = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(record)) => record,
            Ok(_) => {
                warn!(line, "failed to parse change: not an object");
                return None;
            }
            Err(e) => {
                warn!(error = %e, line, "failed to parse change");
                return None;
            }
        };

        if record.contains_key("error") {
            warn!(line, "received error");
            return None;
        }

        let seq = record
            .get("seq")
            .cloned()
            .and_then(SequenceToken::from_value);

        let Some(event) = ChangeEvent::from_map(record) else {
            trace!(line, "change without id, dropped");
            return None;
        };

        if self.shutdown.is_cancelled() {
            warn!(id = %event.id, "river was closing while processing couchdb doc, operation skipped");
            return None;
        }

        if event.is_design_doc() {
            trace!(id = %event.id, "ignoring design document");
            return seq;
        }

        let event = match &self.transform {
            Some(hook) => {
                let id = event.id.clone();
                match hook.transform(event) {
                    Ok(ev) => ev,
                    Err(e) => {
                        warn!(id = %id, error = %e, "failed to transform change, ignoring");
                        return seq;
                    }
                }
            }
            None => event,
        };

        match self.derive(event) {
            Derived::Mutation(m) => {
                if self.shutdown.is_cancelled() {
                    warn!(mutation = %m, "river was closing while trying to write document, operation skipped");
                    return None;
                }
                if let Err(e) = self.sink.submit(m) {
                    warn!(error = %e, "failed to submit mutation");
                }
            }
            Derived::Ignored => {}
            Derived::Unknown => warn!(line, "ignoring unknown change"),
        }
        seq
    }

    fn derive(&self, event: ChangeEvent) -> Derived {
        if event.ignore {
            return Derived::Ignored;
        }

        let index = event.index.unwrap_or_else(|| self.config.index.clone());
        let doc_type = event.doc_type.unwrap_or_else(|| self.config.doc_type.clone());

        if event.deleted {
            trace!(%index, %doc_type, id = %event.id, "processing [delete]");
            return Derived::Mutation(Mutation::Delete {
                index,
                doc_type,
                id: event.id,
                routing: event.routing,
                parent: event.parent,
            });
        }

        match event.doc {
            Some(mut document) => {
                if self.config.ignore_attachments {
                    document.remove(ATTACHMENTS_FIELD);
                }
                trace!(%index, %doc_type, id = %event.id, "processing [index]");
                Derived::Mutation(Mutation::Upsert {
                    index,
                    doc_type,
                    id: event.id,
                    document,
                    routing: event.routing,
                    parent: event.parent,
                })
            }
            None => Derived::Unknown,
        }
    }
}

enum Derived {
    Mutation(Mutation),
    Ignored,
    Unknown,
}
