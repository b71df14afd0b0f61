//! couchriver-feed: the `_changes` side of the river.
//!
//! - [`request`] builds the continuous-feed URL (`since`, filter, heartbeat)
//! - [`client`] opens the stream over HTTP(S) and splits it into lines
//! - [`reader`] is the connect → stream → backoff state machine
//! - [`river`] wires reader, mutator, sink and checkpoint store together
//! - [`builder`] is a fluent way to assemble a river

pub mod builder;
pub mod client;
pub mod error;
pub mod reader;
pub mod request;
pub mod river;

pub use builder::RiverBuilder;
pub use client::{FeedSource, HttpFeedClient, LineStream};
pub use error::FeedError;
pub use reader::{FeedReader, FeedStats, ReaderState, StatsSnapshot};
pub use request::FeedRequest;
pub use river::River;
