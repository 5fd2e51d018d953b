//! Scan scheduling engine.
//!
//! One background task drives the cadence. Each cycle captures the current
//! [`ScanConfig`], probes, classifies, and publishes a complete snapshot to
//! the [`DeviceTable`]. Cycles never overlap: ticks that elapse during a
//! scan are skipped, and immediate triggers that arrive during a scan are
//! coalesced into it.
//!
//! State machine: `Idle -> Scanning -> Idle`, with `Stopping -> Stopped`
//! reachable from any state. A scan that has entered `Scanning` always
//! finishes and publishes, even if `stop()` is called meanwhile.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use ipnet::Ipv4Net;
use radar_core::events::{EventPayload, ScanEvent, ScanTrigger};
use radar_core::{Device, MacAddress, ScanId, Snapshot};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::arp::{ProbeReply, Prober};
use crate::classify::{HostClassifier, OsPrefixTable};
use crate::config::ScanConfig;
use crate::diff;
use crate::error::{DiscoverError, Result};
use crate::subnet;
use crate::table::DeviceTable;

/// Slack on top of the configured probe timeout before a probe is abandoned.
const PROBE_GRACE: Duration = Duration::from_secs(2);

/// Reverse-DNS lookups in flight per cycle.
const MAX_CONCURRENT_LOOKUPS: usize = 16;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scanning,
    Stopping,
    Stopped,
}

/// Result of [`ScanScheduler::trigger_immediate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A scan will start as soon as the worker picks it up.
    Accepted,
    /// A scan is already running or pending; the request folds into it.
    Coalesced,
    /// The scheduler is stopping or stopped.
    Rejected,
}

enum Worker {
    NotStarted(mpsc::Receiver<()>),
    Running(JoinHandle<()>),
    Finished,
}

struct Shared {
    prober: Arc<dyn Prober>,
    classifier: HostClassifier,
    table: Arc<DeviceTable>,
    config: watch::Sender<ScanConfig>,
    state: watch::Sender<SchedulerState>,
    events: broadcast::Sender<ScanEvent>,
    triggers: mpsc::Sender<()>,
    shutdown: watch::Sender<bool>,
    /// Held for the whole of a cycle, whichever task runs it.
    cycle: tokio::sync::Mutex<()>,
}

/// Drives periodic and on-demand scans and publishes their snapshots.
pub struct ScanScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Worker>,
}

impl ScanScheduler {
    pub fn new(
        prober: Arc<dyn Prober>,
        classifier: HostClassifier,
        table: Arc<DeviceTable>,
        config: ScanConfig,
    ) -> Self {
        let (triggers, trigger_rx) = mpsc::channel(1);
        let (config, _) = watch::channel(config);
        let (state, _) = watch::channel(SchedulerState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                prober,
                classifier,
                table,
                config,
                state,
                events,
                triggers,
                shutdown,
                cycle: tokio::sync::Mutex::new(()),
            }),
            worker: Mutex::new(Worker::NotStarted(trigger_rx)),
        }
    }

    pub fn table(&self) -> Arc<DeviceTable> {
        Arc::clone(&self.shared.table)
    }

    pub fn state(&self) -> SchedulerState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SchedulerState> {
        self.shared.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ScanEvent> {
        self.shared.events.subscribe()
    }

    /// The config the next cycle will capture.
    pub fn config(&self) -> ScanConfig {
        self.shared.config.borrow().clone()
    }

    /// Probe, classify, and assemble one snapshot without publishing it.
    pub async fn run_once(&self, config: &ScanConfig) -> Snapshot {
        let scan_id = ScanId::new();
        let devices = self.shared.collect_devices(scan_id, config).await;
        Snapshot::new(scan_id, config.subnet, Utc::now(), devices)
    }

    /// Run one full cycle on the caller's task and publish it.
    ///
    /// Returns `false` without scanning if a cycle is already running or the
    /// scheduler has stopped.
    pub async fn scan_now(&self) -> bool {
        self.shared.scan_cycle(ScanTrigger::Manual).await
    }

    /// Launch the background cadence using `config.interval`.
    ///
    /// The first scan starts immediately.
    pub fn start_periodic(&self, config: ScanConfig) -> Result<()> {
        config.validate()?;

        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *worker, Worker::Finished) {
            Worker::NotStarted(triggers) => {
                tracing::info!(
                    subnet = %config.subnet,
                    interval_ms = millis(config.interval),
                    "Scheduler started"
                );
                self.shared.config.send_replace(config);
                let shutdown = self.shared.shutdown.subscribe();
                let shared = Arc::clone(&self.shared);
                *worker = Worker::Running(tokio::spawn(run_periodic(shared, triggers, shutdown)));
                Ok(())
            }
            Worker::Running(handle) => {
                *worker = Worker::Running(handle);
                Err(DiscoverError::AlreadyRunning)
            }
            Worker::Finished => Err(DiscoverError::Stopped),
        }
    }

    /// Request an out-of-cadence scan.
    pub fn trigger_immediate(&self) -> TriggerOutcome {
        let state = self.state();
        match state {
            SchedulerState::Scanning => return TriggerOutcome::Coalesced,
            SchedulerState::Stopping | SchedulerState::Stopped => return TriggerOutcome::Rejected,
            SchedulerState::Idle => {}
        }

        match self.shared.triggers.try_send(()) {
            Ok(()) => TriggerOutcome::Accepted,
            Err(TrySendError::Full(())) => TriggerOutcome::Coalesced,
            Err(TrySendError::Closed(())) => TriggerOutcome::Rejected,
        }
    }

    /// Replace the config captured by subsequent cycles.
    pub fn update_config(&self, config: ScanConfig) -> Result<()> {
        config.validate()?;
        self.shared.config.send_replace(config);
        Ok(())
    }

    /// Validate `input` and, if it parses, scan it right away.
    ///
    /// On error the config is left untouched.
    pub fn set_subnet(&self, input: &str) -> Result<Ipv4Net> {
        let subnet = subnet::validate(input)?;
        self.shared.config.send_modify(|config| config.subnet = subnet);
        self.shared.emit(EventPayload::SubnetChanged {
            subnet: subnet.to_string(),
        });

        let outcome = self.trigger_immediate();
        tracing::info!(subnet = %subnet, trigger = ?outcome, "Subnet updated");
        Ok(subnet)
    }

    /// Cancel the cadence. An in-flight scan finishes and publishes before
    /// the state becomes `Stopped`, including one started by [`Self::scan_now`].
    pub async fn stop(&self) {
        self.shared.shutdown.send_replace(true);
        self.shared.state.send_if_modified(|state| match state {
            SchedulerState::Stopping | SchedulerState::Stopped => false,
            _ => {
                *state = SchedulerState::Stopping;
                true
            }
        });

        let handle = {
            let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *worker, Worker::Finished) {
                Worker::Running(handle) => Some(handle),
                _ => None,
            }
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scan worker panicked");
            }
        }

        // Wait out a cycle running on a caller's task.
        let _drained = self.shared.cycle.lock().await;
        if self.shared.state.send_replace(SchedulerState::Stopped) != SchedulerState::Stopped {
            self.shared.emit(EventPayload::SchedulerStopped);
        }
    }
}

impl Drop for ScanScheduler {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
    }
}

impl Shared {
    fn emit(&self, payload: EventPayload) {
        // No subscribers is fine.
        let _ = self.events.send(ScanEvent::new(payload));
    }

    /// One full cycle: capture config, scan, publish. Returns `false` if the
    /// scheduler was not idle and nothing ran.
    async fn scan_cycle(&self, trigger: ScanTrigger) -> bool {
        let Ok(_cycle) = self.cycle.try_lock() else {
            return false;
        };
        let began = self.state.send_if_modified(|state| {
            if *state == SchedulerState::Idle {
                *state = SchedulerState::Scanning;
                true
            } else {
                false
            }
        });
        if !began {
            return false;
        }

        let config = self.config.borrow().clone();
        let scan_id = ScanId::new();
        let started = Instant::now();

        tracing::info!(scan_id = %scan_id, subnet = %config.subnet, trigger = ?trigger, "Scan started");
        self.emit(EventPayload::ScanStarted {
            scan_id,
            subnet: config.subnet.to_string(),
            trigger,
        });

        let devices = self.collect_devices(scan_id, &config).await;
        let previous = self.table.current();
        // Never older than what is published, even if the wall clock stepped back.
        let scanned_at = Utc::now().max(previous.scanned_at());
        let snapshot = Snapshot::new(scan_id, config.subnet, scanned_at, devices);
        let changes = diff::compute_diff(&previous, &snapshot);
        let device_count = snapshot.device_count();
        let duration_ms = millis(started.elapsed());

        if self.table.publish(snapshot) {
            self.report_completed(scan_id, &config, device_count, &changes, duration_ms);
        } else {
            tracing::warn!(
                scan_id = %scan_id,
                current_scan_id = %self.table.current().scan_id(),
                duration_ms,
                "Scan result discarded, a newer snapshot is already published"
            );
        }

        self.state.send_if_modified(|state| {
            if *state == SchedulerState::Scanning {
                *state = SchedulerState::Idle;
                true
            } else {
                false
            }
        });
        true
    }

    fn report_completed(
        &self,
        scan_id: ScanId,
        config: &ScanConfig,
        device_count: usize,
        changes: &diff::SnapshotDiff,
        duration_ms: u64,
    ) {
        tracing::info!(
            scan_id = %scan_id,
            subnet = %config.subnet,
            devices = device_count,
            appeared = changes.summary.appeared,
            departed = changes.summary.departed,
            changed = changes.summary.changed,
            duration_ms,
            "Scan complete"
        );
        self.emit(EventPayload::ScanCompleted {
            scan_id,
            device_count,
            appeared: changes.summary.appeared,
            departed: changes.summary.departed,
            changed: changes.summary.changed,
            duration_ms,
        });
    }

    /// Probe and classify one subnet. Devices come back ordered by IP.
    async fn collect_devices(&self, scan_id: ScanId, config: &ScanConfig) -> Vec<Device> {
        let guard = config.probe_timeout + PROBE_GRACE;
        let probe = self.prober.probe(config.subnet, config.probe_timeout);
        let replies = match tokio::time::timeout(guard, probe).await {
            Ok(replies) => replies,
            Err(_) => {
                tracing::warn!(
                    scan_id = %scan_id,
                    subnet = %config.subnet,
                    "Probe overran its timeout, treating as empty"
                );
                Vec::new()
            }
        };

        let replies = dedupe_replies(replies);
        self.identify_all(&replies, config).await
    }

    /// Classify replies concurrently. Output order follows `replies`.
    ///
    /// The semaphore bounds tasks waiting on a lookup. Blocking resolver
    /// threads are bounded separately by [`crate::classify::SystemResolver`].
    async fn identify_all(&self, replies: &[ProbeReply], config: &ScanConfig) -> Vec<Device> {
        let limiter = Arc::new(Semaphore::new(MAX_CONCURRENT_LOOKUPS));
        let table = Arc::new(config.os_prefixes.clone());
        let mut lookups = JoinSet::new();

        for (index, reply) in replies.iter().copied().enumerate() {
            let classifier = self.classifier.clone();
            let limiter = Arc::clone(&limiter);
            let table = Arc::clone(&table);
            let timeout = config.hostname_timeout;

            lookups.spawn(async move {
                let _permit = limiter.acquire_owned().await;
                (index, classifier.identify(&reply, &table, timeout).await)
            });
        }

        let mut slots: Vec<Option<Device>> = vec![None; replies.len()];
        while let Some(joined) = lookups.join_next().await {
            match joined {
                Ok((index, device)) => slots[index] = Some(device),
                Err(e) => tracing::warn!(error = %e, "Host identification task failed"),
            }
        }

        replies
            .iter()
            .zip(slots)
            .map(|(reply, slot)| slot.unwrap_or_else(|| fallback_device(reply, &config.os_prefixes)))
            .collect()
    }
}

/// Collapse duplicate IPs, last reply wins, and order by address.
fn dedupe_replies(replies: Vec<ProbeReply>) -> Vec<ProbeReply> {
    let mut by_ip: HashMap<Ipv4Addr, MacAddress> = HashMap::with_capacity(replies.len());
    for reply in replies {
        by_ip.insert(reply.ip, reply.mac);
    }

    let mut unique: Vec<ProbeReply> = by_ip
        .into_iter()
        .map(|(ip, mac)| ProbeReply { ip, mac })
        .collect();
    unique.sort_by_key(|r| r.ip);
    unique
}

fn fallback_device(reply: &ProbeReply, table: &OsPrefixTable) -> Device {
    Device {
        ip: reply.ip,
        mac: reply.mac,
        hostname: reply.ip.to_string(),
        os_guess: table.classify(&reply.mac),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn cadence(start: Instant, period: Duration) -> Interval {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn run_periodic(
    shared: Arc<Shared>,
    mut triggers: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut config = shared.config.subscribe();
    let mut period = config.borrow_and_update().interval;
    let mut ticker = cadence(Instant::now(), period);

    // Anything requested before start folds into the first scan.
    while triggers.try_recv().is_ok() {}

    loop {
        if *shutdown.borrow() {
            break;
        }

        let trigger = tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            changed = config.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = config.borrow_and_update().interval;
                if next != period {
                    tracing::info!(
                        old_ms = millis(period),
                        new_ms = millis(next),
                        "Scan interval changed"
                    );
                    period = next;
                    ticker = cadence(Instant::now() + period, period);
                }
                continue;
            }
            _ = ticker.tick() => ScanTrigger::Scheduled,
            Some(()) = triggers.recv() => ScanTrigger::Immediate,
        };

        let started = Instant::now();
        shared.scan_cycle(trigger).await;
        while triggers.try_recv().is_ok() {}

        let elapsed = started.elapsed();
        if elapsed > period {
            let missed = u64::try_from(elapsed.as_nanos() / period.as_nanos()).unwrap_or(u64::MAX);
            tracing::debug!(
                missed,
                elapsed_ms = millis(elapsed),
                "Scan overran interval, skipping missed ticks"
            );
            shared.emit(EventPayload::TicksSkipped { missed });
        }
    }

    // `stop()` owns the transition to `Stopped` once every cycle has drained.
    tracing::info!("Scan worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(last: u8, mac: &str) -> ProbeReply {
        ProbeReply {
            ip: Ipv4Addr::new(10, 0, 0, last),
            mac: mac.parse().unwrap(),
        }
    }

    #[test]
    fn test_dedupe_last_write_wins() {
        let replies = vec![
            reply(9, "00:00:00:00:00:09"),
            reply(5, "00:00:00:00:00:01"),
            reply(5, "00:00:00:00:00:02"),
        ];
        let unique = dedupe_replies(replies);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].ip, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(unique[0].mac.to_string(), "00:00:00:00:00:02");
        assert_eq!(unique[1].ip, Ipv4Addr::new(10, 0, 0, 9));
    }

    #[test]
    fn test_fallback_device_keeps_classification() {
        let device = fallback_device(&reply(5, "5C:1F:00:11:22:33"), &OsPrefixTable::builtin());
        assert_eq!(device.hostname, "10.0.0.5");
        assert_eq!(device.os_guess, radar_core::OsGuess::Apple);
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_cadence_does_not_burst() {
        let start = Instant::now();
        let mut ticker = cadence(start, Duration::from_secs(1));
        ticker.tick().await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        // One late tick fires immediately, the next waits for the grid.
        ticker.tick().await;
        let late = Instant::now();
        ticker.tick().await;
        assert!(Instant::now() > late);
    }
}
