use thiserror::Error;

/// Top-level error type for radar domain values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadarError {
    #[error("Invalid subnet '{input}': {reason}")]
    InvalidSubnet { input: String, reason: String },

    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("Invalid vendor prefix '{0}': expected 1 to 6 hex digits")]
    InvalidPrefix(String),

    #[error("Unknown OS label: {0}")]
    UnknownOsLabel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
