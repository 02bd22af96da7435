//! Stream buffering
//!
//! A producer thread pulls bytes from the live connection into a fixed-size
//! ring buffer; the consumer reads through a blocking `Read` facade. Fill
//! level drives a watermark state machine (initial fill gate, underrun
//! detection) and connection failures trigger reconnection with
//! exponential backoff. ICY track titles are polled on a separate thread.

pub mod backoff;
pub mod buffered;
pub mod icy;
pub mod metadata;
mod producer;
pub mod ring;
mod shared;
pub mod source;
pub mod state;
pub mod types;

pub use backoff::{Backoff, ReconnectConfig, RetryDecision};
pub use buffered::BufferedStream;
pub use icy::{IcyHeaders, MetadataPoller};
pub use metadata::TrackInfo;
pub use ring::RingBuffer;
pub use source::{Connection, HttpSource, StreamSource};
pub use state::{BufferState, BufferStats, Watermarks};
pub use types::BufferConfig;
