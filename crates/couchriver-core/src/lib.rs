//! couchriver-core: foundation for mirroring a CouchDB `_changes` feed into
//! a search index.
//!
//! # Architecture
//!
//! ```text
//! FeedReader ──put──► ChangeQueue ──take──► Mutator ──► BulkSink
//!  (slurper)          (bounded)            (indexer) └─► CheckpointManager
//! ```
//!
//! The reader and the mutator are two tasks that share only the
//! [`ChangeQueue`] and a [`CancellationToken`](tokio_util::sync::CancellationToken).

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod mutator;
pub mod queue;
pub mod sink;
pub mod token;
pub mod transform;
pub mod types;

pub use checkpoint::{CheckpointManager, CheckpointStore, MemoryCheckpointStore};
pub use config::{FeedConfig, IndexConfig, QueueCapacity, RiverConfig};
pub use error::RiverError;
pub use mutator::{Mutator, MutatorConfig};
pub use queue::{ChangeQueue, QueueReceiver, QueueSender};
pub use sink::{BulkSink, MemorySink};
pub use token::SequenceToken;
pub use transform::{TransformError, TransformHook};
pub use types::{ChangeEvent, Mutation};

pub use tokio_util::sync::CancellationToken;
