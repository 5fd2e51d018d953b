//! Active ARP sweep over an IPv4 subnet.
//!
//! Frames are built and parsed with `pnet`. The sweep itself runs on the
//! blocking pool because datalink receivers have no async interface.
//!
//! Raw Ethernet access needs root or `CAP_NET_RAW`. [`ArpProber::open`]
//! checks this once; individual probes that fail later fold into an empty
//! result.

use std::io;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ipnet::Ipv4Net;
use pnet::datalink::{self, Channel, Config, DataLinkReceiver, DataLinkSender, NetworkInterface};
use pnet::ipnetwork::IpNetwork;
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::Packet;
use pnet::util::MacAddr;
use radar_core::MacAddress;

use crate::error::{DiscoverError, Result};

const ETH_HEADER_LEN: usize = 14;
const ARP_PACKET_LEN: usize = 28;
const ARP_FRAME_LEN: usize = ETH_HEADER_LEN + ARP_PACKET_LEN;

/// Receiver poll interval; bounds how far a sweep can overrun its timeout.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Largest sweep issued in one probe (a /16 worth of hosts).
const MAX_SWEEP_TARGETS: usize = 65_534;

/// Requests sent between receive drains.
const SEND_BATCH: usize = 256;

/// One ARP reply: a live host and its hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReply {
    pub ip: Ipv4Addr,
    pub mac: MacAddress,
}

/// Discovery seam used by the scheduler.
///
/// Implementations must not fail: a probe that cannot run (no permission,
/// interface down, nobody answering) returns an empty list.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, subnet: Ipv4Net, timeout: Duration) -> Vec<ProbeReply>;
}

/// The interface and addresses requests are sent from.
#[derive(Debug, Clone)]
struct Source {
    interface: NetworkInterface,
    mac: MacAddr,
    ip: Ipv4Addr,
}

/// ARP prober bound to one network interface.
#[derive(Debug, Clone)]
pub struct ArpProber {
    source: Source,
}

impl ArpProber {
    /// Select an interface and verify raw socket access on it.
    ///
    /// With `interface_name` unset, the first interface that is up, not
    /// loopback, and has both a MAC and an IPv4 address is used.
    pub fn open(interface_name: Option<&str>) -> Result<Self> {
        let source = select_source(datalink::interfaces(), interface_name)?;

        let (tx, rx) = open_channel(&source.interface, channel_config(), datalink::channel)?;
        drop((tx, rx));

        tracing::info!(
            interface = %source.interface.name,
            mac = %source.mac,
            ip = %source.ip,
            "ARP prober ready"
        );
        Ok(Self { source })
    }

    pub fn interface_name(&self) -> &str {
        &self.source.interface.name
    }

    pub fn source_ip(&self) -> Ipv4Addr {
        self.source.ip
    }
}

#[async_trait]
impl Prober for ArpProber {
    async fn probe(&self, subnet: Ipv4Net, timeout: Duration) -> Vec<ProbeReply> {
        let source = self.source.clone();
        let sweep = tokio::task::spawn_blocking(move || sweep(&source, subnet, timeout));

        match sweep.await {
            Ok(Ok(replies)) => {
                tracing::debug!(subnet = %subnet, replies = replies.len(), "ARP sweep finished");
                replies
            }
            Ok(Err(e)) => {
                tracing::warn!(subnet = %subnet, error = %e, "ARP sweep failed");
                Vec::new()
            }
            Err(e) => {
                tracing::error!(subnet = %subnet, error = %e, "ARP sweep task panicked");
                Vec::new()
            }
        }
    }
}

fn sweep(source: &Source, subnet: Ipv4Net, timeout: Duration) -> Result<Vec<ProbeReply>> {
    let deadline = Instant::now() + timeout;
    let (mut tx, mut rx) = open_channel(&source.interface, channel_config(), datalink::channel)?;
    run_sweep(tx.as_mut(), rx.as_mut(), source.mac, source.ip, subnet, deadline)
}

/// Send requests in batches, draining replies between batches, and keep
/// listening until `deadline`. Nothing is sent once the deadline passes.
fn run_sweep(
    tx: &mut dyn DataLinkSender,
    rx: &mut dyn DataLinkReceiver,
    source_mac: MacAddr,
    source_ip: Ipv4Addr,
    subnet: Ipv4Net,
    deadline: Instant,
) -> Result<Vec<ProbeReply>> {
    let targets = sweep_targets(subnet);
    let mut replies = Vec::new();
    let mut sent = 0;

    for batch in targets.chunks(SEND_BATCH) {
        if Instant::now() >= deadline {
            break;
        }
        for target in batch {
            let frame = build_request(source_mac, source_ip, *target)?;
            if let Some(Err(e)) = tx.send_to(&frame, None) {
                tracing::trace!(target = %target, error = %e, "ARP request not sent");
            }
        }
        sent += batch.len();

        if !collect_replies(rx, subnet, source_ip, deadline, true, &mut replies) {
            return Ok(replies);
        }
    }

    if sent < targets.len() {
        tracing::debug!(
            subnet = %subnet,
            sent,
            targets = targets.len(),
            "Sweep deadline reached before every request was sent"
        );
    }

    collect_replies(rx, subnet, source_ip, deadline, false, &mut replies);
    Ok(replies)
}

/// Read frames into `replies` until `deadline`, or until the receiver is
/// idle when `until_idle` is set. Returns `false` if the receiver failed.
fn collect_replies(
    rx: &mut dyn DataLinkReceiver,
    subnet: Ipv4Net,
    source_ip: Ipv4Addr,
    deadline: Instant,
    until_idle: bool,
    replies: &mut Vec<ProbeReply>,
) -> bool {
    while Instant::now() < deadline {
        match rx.next() {
            Ok(frame) => {
                if let Some(reply) = parse_reply(frame) {
                    if subnet.contains(&reply.ip) && reply.ip != source_ip {
                        replies.push(reply);
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                if until_idle {
                    return true;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Datalink receive failed, ending sweep early");
                return false;
            }
        }
    }
    true
}

/// Host addresses to probe in `subnet`, capped at [`MAX_SWEEP_TARGETS`].
fn sweep_targets(subnet: Ipv4Net) -> Vec<Ipv4Addr> {
    let targets: Vec<Ipv4Addr> = subnet.hosts().take(MAX_SWEEP_TARGETS).collect();
    if subnet.prefix_len() < 16 {
        tracing::warn!(
            subnet = %subnet,
            probed = targets.len(),
            "Subnet larger than /16, sweeping only the first addresses"
        );
    }
    targets
}

fn select_source(interfaces: Vec<NetworkInterface>, name: Option<&str>) -> Result<Source> {
    let usable = |intf: &NetworkInterface| -> Option<Source> {
        let mac = intf.mac.filter(|m| *m != MacAddr::zero())?;
        let ip = intf.ips.iter().find_map(|net| match net {
            IpNetwork::V4(v4) => Some(v4.ip()),
            IpNetwork::V6(_) => None,
        })?;
        Some(Source {
            interface: intf.clone(),
            mac,
            ip,
        })
    };

    match name {
        Some(name) => {
            let intf = interfaces
                .iter()
                .find(|i| i.name == name)
                .ok_or_else(|| DiscoverError::Interface(format!("{name} not found")))?;
            usable(intf).ok_or_else(|| {
                DiscoverError::Interface(format!("{name} has no MAC or IPv4 address"))
            })
        }
        None => interfaces
            .iter()
            .filter(|i| i.is_up() && !i.is_loopback())
            .find_map(usable)
            .ok_or_else(|| DiscoverError::Interface("no usable interface found".to_string())),
    }
}

fn channel_config() -> Config {
    Config {
        read_timeout: Some(READ_TIMEOUT),
        ..Default::default()
    }
}

fn open_channel<F>(
    intf: &NetworkInterface,
    cfg: Config,
    opener: F,
) -> Result<(Box<dyn DataLinkSender>, Box<dyn DataLinkReceiver>)>
where
    F: FnOnce(&NetworkInterface, Config) -> io::Result<Channel>,
{
    match opener(intf, cfg) {
        Ok(Channel::Ethernet(tx, rx)) => Ok((tx, rx)),
        Ok(_) => Err(DiscoverError::UnsupportedChannel(intf.name.clone())),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Err(DiscoverError::Privilege {
            interface: intf.name.clone(),
            reason: e.to_string(),
        }),
        Err(e) => Err(DiscoverError::Io(e)),
    }
}

/// Build a broadcast ARP "who-has `target_ip`" frame.
pub fn build_request(source_mac: MacAddr, source_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; ARP_FRAME_LEN];

    {
        let mut eth = MutableEthernetPacket::new(&mut buffer[..ETH_HEADER_LEN])
            .ok_or(DiscoverError::Frame("ethernet header buffer too small"))?;
        eth.set_destination(MacAddr::broadcast());
        eth.set_source(source_mac);
        eth.set_ethertype(EtherTypes::Arp);
    }

    {
        let mut arp = MutableArpPacket::new(&mut buffer[ETH_HEADER_LEN..])
            .ok_or(DiscoverError::Frame("ARP buffer too small"))?;
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(ArpOperations::Request);
        arp.set_sender_hw_addr(source_mac);
        arp.set_sender_proto_addr(source_ip);
        arp.set_target_hw_addr(MacAddr::zero());
        arp.set_target_proto_addr(target_ip);
    }

    Ok(buffer)
}

/// Extract the sender of an ARP reply frame. Anything else yields `None`.
pub fn parse_reply(frame: &[u8]) -> Option<ProbeReply> {
    let eth = EthernetPacket::new(frame)?;
    if eth.get_ethertype() != EtherTypes::Arp {
        return None;
    }

    let arp = ArpPacket::new(eth.payload())?;
    if arp.get_operation() != ArpOperations::Reply {
        return None;
    }

    let MacAddr(a, b, c, d, e, f) = arp.get_sender_hw_addr();
    let mac = MacAddress::new([a, b, c, d, e, f]);
    if mac.is_zero() {
        return None;
    }

    Some(ProbeReply {
        ip: arp.get_sender_proto_addr(),
        mac,
    })
}
