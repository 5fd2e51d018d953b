//! Change detection between consecutive snapshots.
//!
//! Used for reporting only. Devices are never carried over from one
//! snapshot to the next.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use radar_core::{Device, Snapshot};

/// The outcome of comparing two snapshots.
#[derive(Debug, Default)]
pub struct SnapshotDiff {
    pub appeared: Vec<Device>,
    pub departed: Vec<Device>,
    /// Same IP, different MAC, hostname or OS guess. Holds the new record.
    pub changed: Vec<Device>,
    pub summary: DiffSummary,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiffSummary {
    pub total: usize,
    pub appeared: usize,
    pub departed: usize,
    pub changed: usize,
}

/// Compare `current` against `previous`, keyed by IP.
pub fn compute_diff(previous: &Snapshot, current: &Snapshot) -> SnapshotDiff {
    let before: HashMap<Ipv4Addr, &Device> = previous.iter().map(|d| (d.ip, d)).collect();
    let after: HashMap<Ipv4Addr, &Device> = current.iter().map(|d| (d.ip, d)).collect();

    let mut appeared = Vec::new();
    let mut changed = Vec::new();
    for device in current {
        match before.get(&device.ip) {
            None => appeared.push(device.clone()),
            Some(old) if *old != device => changed.push(device.clone()),
            Some(_) => {}
        }
    }

    let departed: Vec<Device> = previous
        .iter()
        .filter(|d| !after.contains_key(&d.ip))
        .cloned()
        .collect();

    let summary = DiffSummary {
        total: current.device_count(),
        appeared: appeared.len(),
        departed: departed.len(),
        changed: changed.len(),
    };

    SnapshotDiff {
        appeared,
        departed,
        changed,
        summary,
    }
}
