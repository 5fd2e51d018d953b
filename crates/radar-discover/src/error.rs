//! Error types for the radar-discover crate.

use radar_core::RadarError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("Raw socket access denied on {interface}: {reason} (run as root or grant CAP_NET_RAW)")]
    Privilege { interface: String, reason: String },

    #[error("Network interface error: {0}")]
    Interface(String),

    #[error("Unsupported datalink channel on {0}")]
    UnsupportedChannel(String),

    #[error("Malformed frame: {0}")]
    Frame(&'static str),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler has been stopped")]
    Stopped,

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Radar(#[from] RadarError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DiscoverError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DiscoverError>;
