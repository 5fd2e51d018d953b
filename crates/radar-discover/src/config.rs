//! Configuration for the radar scanner.

use std::time::Duration;

use ipnet::Ipv4Net;
use radar_core::config::{
    CONFIG_SECTION, DEFAULT_HOSTNAME_TIMEOUT_MS, DEFAULT_OS_PREFIXES, DEFAULT_PROBE_TIMEOUT_MS,
    DEFAULT_SCAN_INTERVAL_SECS, ENV_PREFIX,
};
use radar_core::{OsGuess, RadarError};
use serde::Deserialize;

use crate::classify::OsPrefixTable;
use crate::error::{DiscoverError, Result};
use crate::subnet;

/// Settings captured by each scan cycle when it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub subnet: Ipv4Net,
    /// Time between periodic scans.
    pub interval: Duration,
    /// How long an ARP sweep collects replies.
    pub probe_timeout: Duration,
    /// Upper bound on each reverse-DNS lookup.
    pub hostname_timeout: Duration,
    pub os_prefixes: OsPrefixTable,
}

impl ScanConfig {
    /// Defaults for everything except the subnet.
    pub fn new(subnet: Ipv4Net) -> Self {
        Self {
            subnet,
            interval: Duration::from_secs(DEFAULT_SCAN_INTERVAL_SECS),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            hostname_timeout: Duration::from_millis(DEFAULT_HOSTNAME_TIMEOUT_MS),
            os_prefixes: OsPrefixTable::builtin(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_hostname_timeout(mut self, timeout: Duration) -> Self {
        self.hostname_timeout = timeout;
        self
    }

    pub fn with_os_prefixes(mut self, table: OsPrefixTable) -> Self {
        self.os_prefixes = table;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(DiscoverError::Config("scan interval must be non-zero".to_string()));
        }
        if self.probe_timeout.is_zero() {
            return Err(DiscoverError::Config("probe timeout must be non-zero".to_string()));
        }
        if self.hostname_timeout.is_zero() {
            return Err(DiscoverError::Config("hostname timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Scan settings as loaded from file and environment.
///
/// Loaded from the `radar.toml` `[scan]` section or
/// `RADAR_SCAN__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct RadarConfig {
    /// CIDR to scan. Detected from the default route when unset.
    #[serde(default)]
    pub subnet: Option<String>,

    /// Interface to probe from. First usable interface when unset.
    #[serde(default)]
    pub interface: Option<String>,

    /// Seconds between periodic scans.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// ARP reply collection window in milliseconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Reverse-DNS bound in milliseconds.
    #[serde(default = "default_hostname_timeout")]
    pub hostname_timeout_ms: u64,

    /// Vendor-prefix to OS rules.
    #[serde(default = "default_os_prefixes")]
    pub os_prefixes: Vec<OsPrefixRule>,
}

/// One `[[scan.os_prefixes]]` entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct OsPrefixRule {
    pub prefix: String,
    pub os: String,
}

fn default_interval() -> u64 {
    DEFAULT_SCAN_INTERVAL_SECS
}

fn default_probe_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

fn default_hostname_timeout() -> u64 {
    DEFAULT_HOSTNAME_TIMEOUT_MS
}

fn default_os_prefixes() -> Vec<OsPrefixRule> {
    DEFAULT_OS_PREFIXES
        .iter()
        .map(|(prefix, os)| OsPrefixRule {
            prefix: prefix.to_string(),
            os: os.to_string(),
        })
        .collect()
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            subnet: None,
            interface: None,
            interval_secs: default_interval(),
            probe_timeout_ms: default_probe_timeout(),
            hostname_timeout_ms: default_hostname_timeout(),
            os_prefixes: default_os_prefixes(),
        }
    }
}

impl RadarConfig {
    /// Load `<file_prefix>.toml` (optional) layered under environment
    /// variables. A missing `[scan]` section yields the defaults.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match cfg.get::<RadarConfig>(CONFIG_SECTION) {
            Ok(c) => Ok(c),
            Err(config::ConfigError::NotFound(_)) => Ok(RadarConfig::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn os_prefix_table(&self) -> std::result::Result<OsPrefixTable, RadarError> {
        let rules = self
            .os_prefixes
            .iter()
            .map(|rule| Ok((rule.prefix.as_str(), rule.os.parse::<OsGuess>()?)))
            .collect::<std::result::Result<Vec<_>, RadarError>>()?;
        OsPrefixTable::from_rules(rules)
    }

    /// Resolve into a runtime [`ScanConfig`], detecting the subnet if unset.
    pub fn to_scan_config(&self) -> Result<ScanConfig> {
        let subnet = match &self.subnet {
            Some(cidr) => subnet::validate(cidr)?,
            None => subnet::detect_local_subnet(),
        };

        let config = ScanConfig::new(subnet)
            .with_interval(Duration::from_secs(self.interval_secs))
            .with_probe_timeout(Duration::from_millis(self.probe_timeout_ms))
            .with_hostname_timeout(Duration::from_millis(self.hostname_timeout_ms))
            .with_os_prefixes(self.os_prefix_table()?);
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = RadarConfig::default();
        assert_eq!(config.interval_secs, 30);
        assert_eq!(config.probe_timeout_ms, 3_000);
        assert_eq!(config.hostname_timeout_ms, 1_000);
        assert_eq!(config.os_prefixes.len(), 3);
        assert!(config.subnet.is_none());
    }

    #[test]
    fn test_to_scan_config_with_subnet() {
        let config = RadarConfig {
            subnet: Some("192.168.50.0/24".to_string()),
            interval_secs: 10,
            ..Default::default()
        };
        let scan = config.to_scan_config().unwrap();
        assert_eq!(scan.subnet.to_string(), "192.168.50.0/24");
        assert_eq!(scan.interval, Duration::from_secs(10));
        assert_eq!(scan.os_prefixes, OsPrefixTable::builtin());
    }

    #[test]
    fn test_to_scan_config_detects_subnet() {
        let scan = RadarConfig::default().to_scan_config().unwrap();
        assert_eq!(scan.subnet.prefix_len(), 24);
    }

    #[test]
    fn test_invalid_subnet_is_reported() {
        let config = RadarConfig {
            subnet: Some("10.0.0.0/99".to_string()),
            ..Default::default()
        };
        let err = config.to_scan_config().unwrap_err();
        assert!(matches!(
            err,
            DiscoverError::Radar(RadarError::InvalidSubnet { .. })
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = RadarConfig {
            subnet: Some("10.0.0.0/24".to_string()),
            interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.to_scan_config().unwrap_err(),
            DiscoverError::Config(_)
        ));
    }

    #[test]
    fn test_bad_os_label_rejected() {
        let config = RadarConfig {
            subnet: Some("10.0.0.0/24".to_string()),
            os_prefixes: vec![OsPrefixRule {
                prefix: "AABB".to_string(),
                os: "plan9".to_string(),
            }],
            ..Default::default()
        };
        assert!(matches!(
            config.to_scan_config().unwrap_err(),
            DiscoverError::Radar(RadarError::UnknownOsLabel(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radar.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[scan]
subnet = "10.20.0.0/16"
interval_secs = 5
probe_timeout_ms = 1500

[[scan.os_prefixes]]
prefix = "AABBCC"
os = "android"
"#
        )
        .unwrap();

        let prefix = dir.path().join("radar");
        let config = RadarConfig::load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config.subnet.as_deref(), Some("10.20.0.0/16"));
        assert_eq!(config.interval_secs, 5);
        assert_eq!(config.probe_timeout_ms, 1500);
        assert_eq!(config.hostname_timeout_ms, 1_000);

        let scan = config.to_scan_config().unwrap();
        assert_eq!(scan.os_prefixes.len(), 1);
        assert_eq!(
            scan.os_prefixes.classify(&"AA:BB:CC:00:00:01".parse().unwrap()),
            OsGuess::Android
        );
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("absent");
        let config = RadarConfig::load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config.interval_secs, 30);
    }
}
