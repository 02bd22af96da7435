//! Configuration constants for the buffering engine

/// Network-related configuration
pub mod network {
    /// User agent for HTTP requests
    pub const USER_AGENT: &str = concat!("radiobuf/", env!("CARGO_PKG_VERSION"));

    /// Connection timeout in seconds
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;

    /// Per-read timeout in seconds; also bounds the wait for response headers
    pub const READ_TIMEOUT_SECS: u64 = 30;
}

/// Ring buffer and telemetry defaults
pub mod buffer {
    /// Ring buffer capacity (bytes), ~15 seconds at 128 kbps
    pub const DEFAULT_CAPACITY: usize = 256 * 1024;

    /// Fill level that opens the initial-fill gate (bytes), ~2 seconds at 128 kbps
    pub const DEFAULT_HIGH_WATERMARK: usize = 32 * 1024;

    /// Fill level that recovers an underrun (bytes)
    pub const DEFAULT_LOW_WATERMARK: usize = 16 * 1024;

    /// Chunk size for producer reads from the connection (bytes)
    pub const DEFAULT_READ_CHUNK_SIZE: usize = 8 * 1024;

    /// Emit a periodic stats snapshot every N writes
    pub const DEFAULT_STATS_INTERVAL: u32 = 8;

    /// Bound of the stats channel; updates beyond it are dropped
    pub const DEFAULT_STATS_CHANNEL_SIZE: usize = 32;

    /// How long `close()` waits for the producer thread before detaching it
    pub const PRODUCER_JOIN_TIMEOUT_MS: u64 = 2_000;
}

/// Reconnection backoff defaults
pub mod reconnect {
    /// First delay after a connection loss (milliseconds)
    pub const INITIAL_BACKOFF_MS: u64 = 1_000;

    /// Cap for exponential backoff (milliseconds)
    pub const MAX_BACKOFF_MS: u64 = 30_000;

    /// Multiplier applied after each failed attempt
    pub const BACKOFF_FACTOR: f64 = 2.0;

    /// 0 = retry forever
    pub const MAX_RETRIES: u32 = 0;
}

/// ICY metadata polling
pub mod metadata {
    /// Time between title polls in seconds
    pub const POLL_INTERVAL_SECS: u64 = 10;

    /// Whole-request timeout for one poll in seconds
    pub const REQUEST_TIMEOUT_SECS: u64 = 15;
}
