//! Buffered stream configuration

use crate::config::buffer::{
    DEFAULT_CAPACITY, DEFAULT_HIGH_WATERMARK, DEFAULT_LOW_WATERMARK, DEFAULT_READ_CHUNK_SIZE,
    DEFAULT_STATS_CHANNEL_SIZE, DEFAULT_STATS_INTERVAL,
};
use crate::error::{RadioError, Result};
use crate::stream::backoff::ReconnectConfig;
use crate::stream::state::Watermarks;

/// Construction-time settings for a `BufferedStream`.
///
/// Every field has a default from [`crate::config::buffer`]; override with
/// the `with_*` methods.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferConfig {
    /// Ring buffer capacity in bytes
    pub capacity: usize,
    pub watermarks: Watermarks,
    /// Bytes requested per network read
    pub read_chunk_size: usize,
    /// Periodic stats snapshot every N writes
    pub stats_interval: u32,
    /// Bound of the stats channel
    pub stats_channel_size: usize,
    pub reconnect: ReconnectConfig,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            watermarks: Watermarks {
                high: DEFAULT_HIGH_WATERMARK,
                low: DEFAULT_LOW_WATERMARK,
            },
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            stats_interval: DEFAULT_STATS_INTERVAL,
            stats_channel_size: DEFAULT_STATS_CHANNEL_SIZE,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl BufferConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_watermarks(mut self, high: usize, low: usize) -> Self {
        self.watermarks = Watermarks { high, low };
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    pub fn with_stats_interval(mut self, every_n_writes: u32) -> Self {
        self.stats_interval = every_n_writes;
        self
    }

    pub fn with_stats_channel_size(mut self, size: usize) -> Self {
        self.stats_channel_size = size;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Reject configurations that would break the buffer invariants
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(RadioError::Config("buffer capacity must be non-zero".into()));
        }
        if self.read_chunk_size == 0 {
            return Err(RadioError::Config("read chunk size must be non-zero".into()));
        }
        if self.stats_interval == 0 {
            return Err(RadioError::Config("stats interval must be non-zero".into()));
        }
        if self.stats_channel_size == 0 {
            return Err(RadioError::Config("stats channel size must be non-zero".into()));
        }
        self.watermarks.validate(self.capacity)?;
        self.reconnect.validate()
    }
}
