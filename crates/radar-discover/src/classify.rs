//! Host classification: vendor-prefix OS guess and bounded reverse DNS.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use radar_core::config::DEFAULT_OS_PREFIXES;
use radar_core::{Device, MacAddress, OsGuess, RadarError};
use tokio::sync::Semaphore;

use crate::arp::ProbeReply;

// ── OS policy ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct PrefixRule {
    /// Uppercase hex, 1 to 6 digits.
    prefix: String,
    os: OsGuess,
}

/// Replaceable mapping from vendor prefix to [`OsGuess`].
///
/// A rule matches when the device OUI starts with its prefix; the longest
/// matching prefix wins. Unmatched devices are [`OsGuess::Unknown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsPrefixTable {
    rules: Vec<PrefixRule>,
}

impl OsPrefixTable {
    /// A table that classifies everything as `Unknown`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in table from [`DEFAULT_OS_PREFIXES`].
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        for (prefix, label) in DEFAULT_OS_PREFIXES {
            let Ok(os) = label.parse() else { continue };
            if let Ok(rule) = parse_rule(prefix, os) {
                table.rules.push(rule);
            }
        }
        table
    }

    pub fn from_rules<I, S>(rules: I) -> Result<Self, RadarError>
    where
        I: IntoIterator<Item = (S, OsGuess)>,
        S: AsRef<str>,
    {
        let rules = rules
            .into_iter()
            .map(|(prefix, os)| parse_rule(prefix.as_ref(), os))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Add or replace the rule for `prefix`.
    pub fn insert(&mut self, prefix: &str, os: OsGuess) -> Result<(), RadarError> {
        let rule = parse_rule(prefix, os)?;
        match self.rules.iter_mut().find(|r| r.prefix == rule.prefix) {
            Some(existing) => existing.os = rule.os,
            None => self.rules.push(rule),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn classify(&self, mac: &MacAddress) -> OsGuess {
        let oui = mac.oui();
        self.rules
            .iter()
            .filter(|r| oui.starts_with(&r.prefix))
            .max_by_key(|r| r.prefix.len())
            .map(|r| r.os)
            .unwrap_or_default()
    }
}

fn parse_rule(prefix: &str, os: OsGuess) -> Result<PrefixRule, RadarError> {
    let hex: String = prefix
        .trim()
        .chars()
        .filter(|c| !matches!(c, ':' | '-'))
        .collect::<String>()
        .to_uppercase();

    if hex.is_empty() || hex.len() > 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(RadarError::InvalidPrefix(prefix.to_string()));
    }
    Ok(PrefixRule { prefix: hex, os })
}

// ── Reverse DNS ───────────────────────────────────────────────────

/// Reverse-DNS lookup seam.
#[async_trait]
pub trait HostnameLookup: Send + Sync {
    /// Resolve `ip` to a name, or `None` when it has none.
    async fn reverse(&self, ip: Ipv4Addr) -> Option<String>;
}

/// Most blocking `getnameinfo` calls a [`SystemResolver`] keeps running.
const MAX_BLOCKING_LOOKUPS: usize = 16;

/// Reverse lookups through the system resolver.
///
/// `getnameinfo` is blocking, so each lookup runs on the blocking pool and
/// holds a permit until the call returns, even when its caller has already
/// timed out. A full limiter makes new lookups wait instead of spawning.
#[derive(Debug, Clone)]
pub struct SystemResolver {
    limiter: Arc<Semaphore>,
}

impl SystemResolver {
    /// Resolver with at most `limit` lookups on the blocking pool.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limiter: Arc::new(Semaphore::new(limit)),
        }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::with_limit(MAX_BLOCKING_LOOKUPS)
    }
}

#[async_trait]
impl HostnameLookup for SystemResolver {
    async fn reverse(&self, ip: Ipv4Addr) -> Option<String> {
        let permit = Arc::clone(&self.limiter).acquire_owned().await.ok()?;
        let lookup = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            dns_lookup::lookup_addr(&IpAddr::V4(ip))
        });
        match lookup.await {
            Ok(Ok(name)) if !name.is_empty() && name != ip.to_string() => Some(name),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                tracing::trace!(ip = %ip, error = %e, "Reverse lookup failed");
                None
            }
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "Reverse lookup task failed");
                None
            }
        }
    }
}

// ── Classifier ────────────────────────────────────────────────────

/// Turns raw probe replies into [`Device`] records.
#[derive(Clone)]
pub struct HostClassifier {
    resolver: Arc<dyn HostnameLookup>,
}

impl HostClassifier {
    pub fn new(resolver: Arc<dyn HostnameLookup>) -> Self {
        Self { resolver }
    }

    /// A classifier backed by the system resolver.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemResolver::default()))
    }

    pub fn classify(&self, table: &OsPrefixTable, mac: &MacAddress) -> OsGuess {
        table.classify(mac)
    }

    /// Reverse-resolve `ip`, falling back to its dotted form on failure or
    /// after `timeout`.
    pub async fn resolve_hostname(&self, ip: Ipv4Addr, timeout: Duration) -> String {
        match tokio::time::timeout(timeout, self.resolver.reverse(ip)).await {
            Ok(Some(name)) => name,
            Ok(None) => ip.to_string(),
            Err(_) => {
                tracing::debug!(ip = %ip, timeout = ?timeout, "Reverse lookup timed out");
                ip.to_string()
            }
        }
    }

    /// Build the full device record for one reply.
    pub async fn identify(
        &self,
        reply: &ProbeReply,
        table: &OsPrefixTable,
        hostname_timeout: Duration,
    ) -> Device {
        let hostname = self.resolve_hostname(reply.ip, hostname_timeout).await;
        Device {
            ip: reply.ip,
            mac: reply.mac,
            hostname,
            os_guess: self.classify(table, &reply.mac),
        }
    }
}

impl std::fmt::Debug for HostClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostClassifier").finish_non_exhaustive()
    }
}
