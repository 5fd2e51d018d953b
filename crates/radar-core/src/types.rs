//! Core domain types for the device inventory.
//!
//! A scan cycle produces one immutable [`Snapshot`] of [`Device`] records.
//! Consumers hold snapshots behind an `Arc` and look devices up by IP or
//! position, never by reference into a previous snapshot.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RadarError;

// ── Scan identity ─────────────────────────────────────────────────

/// Unique identifier for one scan cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ScanId(pub Uuid);

impl ScanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The id carried by the initial snapshot, before any scan completed.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Hardware address ──────────────────────────────────────────────

/// A 48-bit hardware address.
///
/// Displays and serializes as colon-separated uppercase hex
/// (`5C:1F:00:11:22:33`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// The vendor prefix (OUI) as six uppercase hex digits.
    pub fn oui(&self) -> String {
        format!("{:02X}{:02X}{:02X}", self.0[0], self.0[1], self.0[2])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for MacAddress {
    type Err = RadarError;

    /// Accepts colon-, dash- or dot-separated forms as well as bare hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .collect();

        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RadarError::InvalidMac(s.to_string()));
        }

        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| RadarError::InvalidMac(s.to_string()))?;
        }
        Ok(Self(octets))
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

impl TryFrom<String> for MacAddress {
    type Error = RadarError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ── OS guess ──────────────────────────────────────────────────────

/// Coarse operating-system label derived from a vendor prefix.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OsGuess {
    Windows,
    Apple,
    Android,
    #[default]
    Unknown,
}

impl OsGuess {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "Windows",
            Self::Apple => "Apple",
            Self::Android => "Android",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for OsGuess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsGuess {
    type Err = RadarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "windows" => Ok(Self::Windows),
            "apple" => Ok(Self::Apple),
            "android" => Ok(Self::Android),
            "unknown" => Ok(Self::Unknown),
            _ => Err(RadarError::UnknownOsLabel(s.to_string())),
        }
    }
}

// ── Device ────────────────────────────────────────────────────────

/// One host discovered by a scan cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub ip: Ipv4Addr,
    pub mac: MacAddress,
    /// Reverse-DNS name, or the IP in dotted form when resolution failed.
    pub hostname: String,
    pub os_guess: OsGuess,
}

// ── Snapshot ──────────────────────────────────────────────────────

/// The complete, immutable result of one scan cycle.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Snapshot {
    scan_id: ScanId,
    subnet: Option<Ipv4Net>,
    scanned_at: DateTime<Utc>,
    device_count: usize,
    devices: Vec<Device>,
}

impl Snapshot {
    pub fn new(
        scan_id: ScanId,
        subnet: Ipv4Net,
        scanned_at: DateTime<Utc>,
        devices: Vec<Device>,
    ) -> Self {
        Self {
            scan_id,
            subnet: Some(subnet),
            scanned_at,
            device_count: devices.len(),
            devices,
        }
    }

    /// The snapshot a table holds before its first scan completes.
    pub fn empty() -> Self {
        Self {
            scan_id: ScanId::nil(),
            subnet: None,
            scanned_at: DateTime::<Utc>::default(),
            device_count: 0,
            devices: Vec::new(),
        }
    }

    /// True for the placeholder published before any scan.
    pub fn is_initial(&self) -> bool {
        self.scan_id.is_nil()
    }

    pub fn scan_id(&self) -> ScanId {
        self.scan_id
    }

    pub fn subnet(&self) -> Option<Ipv4Net> {
        self.subnet
    }

    pub fn scanned_at(&self) -> DateTime<Utc> {
        self.scanned_at
    }

    pub fn device_count(&self) -> usize {
        self.device_count
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Device> {
        self.devices.iter()
    }

    /// Device at `index` in scan order.
    pub fn device(&self, index: usize) -> Option<&Device> {
        self.devices.get(index)
    }

    /// Look a device up by its IP, the key within a snapshot.
    pub fn get(&self, ip: Ipv4Addr) -> Option<&Device> {
        self.devices.iter().find(|d| d.ip == ip)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Device;
    type IntoIter = std::slice::Iter<'a, Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(ip: [u8; 4], mac: &str, os: OsGuess) -> Device {
        let ip = Ipv4Addr::from(ip);
        Device {
            ip,
            mac: mac.parse().unwrap(),
            hostname: ip.to_string(),
            os_guess: os,
        }
    }

    #[test]
    fn test_mac_display_is_canonical() {
        let mac: MacAddress = "5c:1f:0a:bb:cc:0d".parse().unwrap();
        assert_eq!(mac.to_string(), "5C:1F:0A:BB:CC:0D");
        assert_eq!(mac.oui(), "5C1F0A");
    }

    #[test]
    fn test_mac_parse_separators() {
        let expected = MacAddress::new([0xfc, 0xfb, 0xaa, 0xbb, 0xcc, 0xdd]);
        assert_eq!("FC-FB-AA-BB-CC-DD".parse::<MacAddress>().unwrap(), expected);
        assert_eq!("fcfb.aabb.ccdd".parse::<MacAddress>().unwrap(), expected);
        assert_eq!("fcfbaabbccdd".parse::<MacAddress>().unwrap(), expected);
    }

    #[test]
    fn test_mac_parse_rejects_garbage() {
        assert!("not-a-mac".parse::<MacAddress>().is_err());
        assert!("5C:1F:00:11:22".parse::<MacAddress>().is_err());
        assert!("5C:1F:00:11:22:33:44".parse::<MacAddress>().is_err());
        assert!("ZZ:1F:00:11:22:33".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_mac_serializes_as_string() {
        let mac = MacAddress::new([0, 0x1b, 0x2c, 0x3d, 0x4e, 0x5f]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"00:1B:2C:3D:4E:5F\"");
        let back: MacAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }

    #[test]
    fn test_os_guess_labels() {
        assert_eq!("apple".parse::<OsGuess>().unwrap(), OsGuess::Apple);
        assert_eq!(" WINDOWS ".parse::<OsGuess>().unwrap(), OsGuess::Windows);
        assert!("beos".parse::<OsGuess>().is_err());
        assert_eq!(OsGuess::default(), OsGuess::Unknown);
        assert_eq!(OsGuess::Android.to_string(), "Android");
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = Snapshot::empty();
        assert!(snap.is_initial());
        assert!(snap.is_empty());
        assert_eq!(snap.device_count(), 0);
        assert_eq!(snap.subnet(), None);
    }

    #[test]
    fn test_snapshot_count_matches_devices() {
        let devices = vec![
            device([10, 0, 0, 5], "5C:1F:00:11:22:33", OsGuess::Apple),
            device([10, 0, 0, 6], "FC:FB:AA:BB:CC:DD", OsGuess::Windows),
        ];
        let snap = Snapshot::new(
            ScanId::new(),
            "10.0.0.0/24".parse().unwrap(),
            Utc::now(),
            devices,
        );
        assert!(!snap.is_initial());
        assert_eq!(snap.device_count(), snap.devices().len());
        assert_eq!(snap.device_count(), 2);
    }

    #[test]
    fn test_snapshot_lookups() {
        let snap = Snapshot::new(
            ScanId::new(),
            "10.0.0.0/24".parse().unwrap(),
            Utc::now(),
            vec![
                device([10, 0, 0, 5], "5C:1F:00:11:22:33", OsGuess::Apple),
                device([10, 0, 0, 7], "00:00:00:00:00:01", OsGuess::Unknown),
            ],
        );

        let found = snap.get(Ipv4Addr::new(10, 0, 0, 7)).unwrap();
        assert_eq!(found.os_guess, OsGuess::Unknown);
        assert!(snap.get(Ipv4Addr::new(10, 0, 0, 9)).is_none());
        assert_eq!(snap.device(0).unwrap().ip, Ipv4Addr::new(10, 0, 0, 5));
        assert!(snap.device(2).is_none());
        assert_eq!(snap.iter().count(), 2);
    }

    #[test]
    fn test_device_serializes_ip_as_string() {
        let d = device([192, 168, 1, 20], "A1:B2:00:00:00:01", OsGuess::Android);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["ip"], "192.168.1.20");
        assert_eq!(json["mac"], "A1:B2:00:00:00:01");
        assert_eq!(json["os_guess"], "Android");
    }
}
