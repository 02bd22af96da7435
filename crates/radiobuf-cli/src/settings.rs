//! Buffer and reconnect settings loaded from a JSON file
//!
//! Every field is optional in the file; missing fields fall back to the
//! library defaults. Command-line flags are applied on top.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use radiobuf::config::{buffer, metadata, reconnect};
use radiobuf::stream::{BufferConfig, ReconnectConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CliError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Ring buffer capacity in bytes
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default = "default_high_watermark")]
    pub high_watermark: usize,

    #[serde(default = "default_low_watermark")]
    pub low_watermark: usize,

    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,

    /// Periodic stats snapshot every N writes
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// 0 = retry forever
    #[serde(default)]
    pub max_retries: u32,

    /// Seconds between ICY title polls
    #[serde(default = "default_metadata_interval_secs")]
    pub metadata_interval_secs: u64,
}

fn default_capacity() -> usize {
    buffer::DEFAULT_CAPACITY
}

fn default_high_watermark() -> usize {
    buffer::DEFAULT_HIGH_WATERMARK
}

fn default_low_watermark() -> usize {
    buffer::DEFAULT_LOW_WATERMARK
}

fn default_read_chunk_size() -> usize {
    buffer::DEFAULT_READ_CHUNK_SIZE
}

fn default_stats_interval() -> u32 {
    buffer::DEFAULT_STATS_INTERVAL
}

fn default_initial_backoff_ms() -> u64 {
    reconnect::INITIAL_BACKOFF_MS
}

fn default_max_backoff_ms() -> u64 {
    reconnect::MAX_BACKOFF_MS
}

fn default_backoff_factor() -> f64 {
    reconnect::BACKOFF_FACTOR
}

fn default_metadata_interval_secs() -> u64 {
    metadata::POLL_INTERVAL_SECS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            high_watermark: default_high_watermark(),
            low_watermark: default_low_watermark(),
            read_chunk_size: default_read_chunk_size(),
            stats_interval: default_stats_interval(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            max_retries: reconnect::MAX_RETRIES,
            metadata_interval_secs: default_metadata_interval_secs(),
        }
    }
}

/// Values given explicitly on the command line
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Overrides {
    pub capacity: Option<usize>,
    pub high_watermark: Option<usize>,
    pub low_watermark: Option<usize>,
    pub read_chunk_size: Option<usize>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub metadata_interval_secs: Option<u64>,
}

impl Settings {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "settings file not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(CliError::SettingsRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&text).map_err(|source| CliError::SettingsParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(v) = overrides.capacity {
            self.capacity = v;
        }
        if let Some(v) = overrides.high_watermark {
            self.high_watermark = v;
        }
        if let Some(v) = overrides.low_watermark {
            self.low_watermark = v;
        }
        if let Some(v) = overrides.read_chunk_size {
            self.read_chunk_size = v;
        }
        if let Some(v) = overrides.initial_backoff_ms {
            self.initial_backoff_ms = v;
        }
        if let Some(v) = overrides.max_backoff_ms {
            self.max_backoff_ms = v;
        }
        if let Some(v) = overrides.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = overrides.metadata_interval_secs {
            self.metadata_interval_secs = v;
        }
    }

    /// Library configuration; validated when the stream is constructed.
    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig::default()
            .with_capacity(self.capacity)
            .with_watermarks(self.high_watermark, self.low_watermark)
            .with_read_chunk_size(self.read_chunk_size)
            .with_stats_interval(self.stats_interval)
            .with_reconnect(ReconnectConfig {
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
                backoff_factor: self.backoff_factor,
                max_retries: self.max_retries,
            })
    }

    pub fn metadata_interval(&self) -> Duration {
        Duration::from_secs(self.metadata_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_settings(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_library() {
        let settings = Settings::default();
        assert_eq!(settings.buffer_config(), BufferConfig::default());
        assert_eq!(settings.metadata_interval(), Duration::from_secs(10));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let file = write_settings(r#"{ "capacity": 65536, "max_retries": 5 }"#);
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.capacity, 65536);
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.high_watermark, buffer::DEFAULT_HIGH_WATERMARK);
        assert_eq!(settings.backoff_factor, 2.0);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let file = write_settings("{ capacity: nope");
        let err = Settings::load_from(file.path()).unwrap_err();
        assert!(matches!(err, CliError::SettingsParse { .. }));
        assert!(err.to_string().starts_with("Invalid settings file"));
    }

    #[test]
    fn flags_win_over_file() {
        let file = write_settings(r#"{ "capacity": 65536, "low_watermark": 4096 }"#);
        let mut settings = Settings::load_from(file.path()).unwrap();
        settings.apply(&Overrides {
            capacity: Some(131_072),
            max_retries: Some(2),
            ..Overrides::default()
        });

        let config = settings.buffer_config();
        assert_eq!(config.capacity, 131_072);
        assert_eq!(config.watermarks.low, 4096);
        assert_eq!(config.reconnect.max_retries, 2);
    }

    #[test]
    fn invalid_combination_caught_by_validation() {
        let mut settings = Settings::default();
        settings.apply(&Overrides {
            capacity: Some(1024),
            ..Overrides::default()
        });
        assert!(settings.buffer_config().validate().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let settings = Settings {
            max_retries: 7,
            ..Settings::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }
}
