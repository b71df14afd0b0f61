//! Pluggable per-event transform.
//!
//! A transform receives the parsed change and returns the event to index.
//! It can rewrite the document, redirect it with `_index`/`_type`/`_routing`/
//! `_parent`, or set `ignore`/`deleted`. A failing transform drops the
//! mutation but the change still counts as handled for the checkpoint.

use thiserror::Error;

use crate::types::ChangeEvent;

/// Error returned by a transform.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransformError(pub String);

impl TransformError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Trait for user-provided transforms.
pub trait TransformHook: Send + Sync {
    fn transform(&self, event: ChangeEvent) -> Result<ChangeEvent, TransformError>;
}

impl<F> TransformHook for F
where
    F: Fn(ChangeEvent) -> Result<ChangeEvent, TransformError> + Send + Sync,
{
    fn transform(&self, event: ChangeEvent) -> Result<ChangeEvent, TransformError> {
        self(event)
    }
}
