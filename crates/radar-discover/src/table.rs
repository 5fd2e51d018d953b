//! The live device inventory.
//!
//! The table holds exactly one `Arc<Snapshot>` inside a `tokio::sync::watch`
//! channel. Publishing swaps the pointer; readers clone it. The only shared
//! lock is the channel's internal one, held for the duration of a pointer
//! copy, so readers never wait on a scan and a scan never waits on readers.

use std::sync::Arc;

use radar_core::Snapshot;
use tokio::sync::watch;

#[derive(Debug)]
pub struct DeviceTable {
    current: watch::Sender<Arc<Snapshot>>,
}

impl DeviceTable {
    /// A table holding the initial empty snapshot.
    pub fn new() -> Self {
        let (current, _) = watch::channel(Arc::new(Snapshot::empty()));
        Self { current }
    }

    /// Atomically replace the current snapshot.
    ///
    /// Returns `false`, leaving the table unchanged, if `snapshot` is older
    /// than the one already published.
    pub fn publish(&self, snapshot: Snapshot) -> bool {
        let snapshot = Arc::new(snapshot);
        self.current.send_if_modified(|current| {
            if snapshot.scanned_at() < current.scanned_at() {
                tracing::warn!(
                    scan_id = %snapshot.scan_id(),
                    current_scan_id = %current.scan_id(),
                    "Discarding snapshot older than the published one"
                );
                return false;
            }
            *current = snapshot;
            true
        })
    }

    /// The latest published snapshot.
    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.borrow())
    }

    /// A receiver notified on every publish.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.current.subscribe()
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    use chrono::{Duration, Utc};
    use radar_core::{Device, OsGuess, ScanId};

    fn snapshot_with(count: u8, at: chrono::DateTime<Utc>) -> Snapshot {
        let devices = (1..=count)
            .map(|i| Device {
                ip: Ipv4Addr::new(10, 0, 0, i),
                mac: [0x5c, 0x1f, 0, 0, 0, i].into(),
                hostname: format!("host-{i}"),
                os_guess: OsGuess::Apple,
            })
            .collect();
        Snapshot::new(ScanId::new(), "10.0.0.0/24".parse().unwrap(), at, devices)
    }

    #[test]
    fn test_starts_with_empty_snapshot() {
        let table = DeviceTable::new();
        let snap = table.current();
        assert!(snap.is_initial());
        assert_eq!(snap.device_count(), 0);
    }

    #[test]
    fn test_publish_replaces_wholesale() {
        let table = DeviceTable::new();
        let now = Utc::now();

        assert!(table.publish(snapshot_with(3, now)));
        assert_eq!(table.current().device_count(), 3);

        assert!(table.publish(snapshot_with(0, now + Duration::seconds(30))));
        let snap = table.current();
        assert!(snap.is_empty());
        assert!(!snap.is_initial());
    }

    #[test]
    fn test_older_snapshot_is_rejected() {
        let table = DeviceTable::new();
        let now = Utc::now();
        let newer = snapshot_with(2, now);
        let newer_id = newer.scan_id();

        assert!(table.publish(newer));
        assert!(!table.publish(snapshot_with(5, now - Duration::seconds(1))));
        assert_eq!(table.current().scan_id(), newer_id);
    }

    #[test]
    fn test_held_snapshot_survives_publish() {
        let table = DeviceTable::new();
        let now = Utc::now();
        table.publish(snapshot_with(2, now));
        let held = table.current();

        table.publish(snapshot_with(4, now + Duration::seconds(1)));
        assert_eq!(held.device_count(), 2);
        assert_eq!(held.devices().len(), 2);
        assert_eq!(table.current().device_count(), 4);
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_snapshot() {
        let table = Arc::new(DeviceTable::new());
        let start = Utc::now();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    let mut last_seen = chrono::DateTime::<Utc>::default();
                    for _ in 0..2_000 {
                        let snap = table.current();
                        assert_eq!(snap.device_count(), snap.devices().len());
                        assert!(snap.scanned_at() >= last_seen);
                        last_seen = snap.scanned_at();
                    }
                })
            })
            .collect();

        for i in 0..500u32 {
            let at = start + Duration::milliseconds(i64::from(i));
            table.publish(snapshot_with((i % 20) as u8, at));
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[tokio::test]
    async fn test_subscribers_are_notified() {
        let table = DeviceTable::new();
        let mut rx = table.subscribe();

        table.publish(snapshot_with(1, Utc::now()));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().device_count(), 1);
    }
}
