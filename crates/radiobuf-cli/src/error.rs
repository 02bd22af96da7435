//! Error types for the radiobuf CLI

use std::path::PathBuf;

use radiobuf::error::RadioError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Stream(#[from] RadioError),

    #[error("Cannot read settings file {path:?}: {source}")]
    SettingsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file {path:?}: {source}")]
    SettingsParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot open output {path:?}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("Output failed: {0}")]
    Write(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
