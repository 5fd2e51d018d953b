//! radar-discover: ARP discovery engine for a local IPv4 subnet.
//!
//! Sweeps the subnet with ARP requests on a fixed cadence, guesses each
//! responder's OS from its vendor prefix, resolves hostnames, and publishes
//! every completed scan as one immutable snapshot in a [`table::DeviceTable`].

pub mod arp;
pub mod classify;
pub mod config;
pub mod diff;
pub mod error;
pub mod scheduler;
pub mod subnet;
pub mod table;
