//! Default configuration values shared by radar services.
//!
//! Configuration is loaded from (in priority order):
//! 1. Command-line flags
//! 2. Environment variables (`RADAR_SCAN__` prefix)
//! 3. Config file (`radar.toml`, `[scan]` section)
//! 4. The defaults below

/// Seconds between periodic scans.
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 30;

/// How long an ARP sweep keeps collecting replies.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;

/// Upper bound on a single reverse-DNS lookup.
pub const DEFAULT_HOSTNAME_TIMEOUT_MS: u64 = 1_000;

/// Default config file prefix (`radar.toml`).
pub const DEFAULT_CONFIG_PREFIX: &str = "radar";

/// Config section holding scan settings.
pub const CONFIG_SECTION: &str = "scan";

/// Environment variable prefix, e.g. `RADAR_SCAN__SUBNET`.
pub const ENV_PREFIX: &str = "RADAR";

/// Vendor prefixes used when no table is configured.
///
/// These are illustrative values, not an OUI registry.
pub const DEFAULT_OS_PREFIXES: &[(&str, &str)] =
    &[("5C1F", "Apple"), ("FCFB", "Windows"), ("A1B2", "Android")];
