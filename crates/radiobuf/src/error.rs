//! Error types for radiobuf
//!
//! Centralized error handling using thiserror.

use std::sync::Arc;

use thiserror::Error;

/// Main error type for the buffering engine
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("{}", friendly_network_error(.0))]
    Network(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {0}")]
    HttpStatus(u16),

    #[error("Stream ended unexpectedly")]
    StreamEnded,

    #[error("Max retries exceeded after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Arc<RadioError>,
    },

    #[error("Stream already started")]
    AlreadyStarted,

    #[error("Stream is closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RadioError {
    /// True for conditions the producer never recovers from
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RadioError::StreamEnded | RadioError::RetriesExhausted { .. }
        )
    }
}

/// Result type alias for radiobuf
pub type Result<T> = std::result::Result<T, RadioError>;

fn friendly_network_error(e: &reqwest::Error) -> String {
    if e.is_builder() {
        if let Some(url) = e.url() {
            return format!("Invalid URL: {url}");
        }
        return "Invalid URL".to_string();
    }
    if e.is_connect() {
        if let Some(url) = e.url() {
            return format!("Could not connect to {}", url.host_str().unwrap_or("server"));
        }
        return "Could not connect to server".to_string();
    }
    if e.is_timeout() {
        return "Connection timed out".to_string();
    }
    if e.is_status() {
        if let Some(status) = e.status() {
            return format!("Server responded with HTTP {}", status.as_u16());
        }
    }
    format!("Network error: {e}")
}
