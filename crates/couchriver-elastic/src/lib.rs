//! couchriver-elastic: Elasticsearch collaborators for couchriver.
//!
//! - [`EsBulkSink`] batches mutations into `_bulk` requests, flushed by
//!   count, by interval and with a bound on concurrent requests.
//! - [`EsCheckpointStore`] keeps each river's checkpoint as a document in
//!   the river index, at `{river_index}/{river_name}/_seq`.

pub mod bulk;
pub mod checkpoint;
pub mod client;
pub mod error;

pub use bulk::{BulkSettings, EsBulkSink};
pub use checkpoint::EsCheckpointStore;
pub use client::{EsClient, EsConfig};
pub use error::EsError;
