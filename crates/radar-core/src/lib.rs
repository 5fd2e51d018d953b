//! radar-core: Shared types, events, and error handling for the radar scanner.
//!
//! This crate provides the foundational types used by the discovery engine
//! and by anything that renders its inventory:
//! - Device records and the immutable scan `Snapshot`
//! - Hardware addresses and the coarse OS guess derived from them
//! - Scan lifecycle events
//! - Default configuration values
//! - Common error types

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use error::RadarError;
pub use types::{Device, MacAddress, OsGuess, ScanId, Snapshot};
