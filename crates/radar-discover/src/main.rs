//! CLI entry point for the radar network scanner.

use std::sync::Arc;

use clap::Parser;
use radar_core::config::DEFAULT_CONFIG_PREFIX;
use radar_core::Snapshot;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use radar_discover::arp::ArpProber;
use radar_discover::classify::HostClassifier;
use radar_discover::config::{RadarConfig, ScanConfig};
use radar_discover::scheduler::ScanScheduler;
use radar_discover::table::DeviceTable;

#[derive(Parser)]
#[command(name = "radar")]
#[command(about = "Discover devices on the local IPv4 subnet via ARP")]
struct Cli {
    /// Subnet to scan (CIDR, e.g. 192.168.1.0/24). Detected when omitted.
    #[arg(short, long)]
    subnet: Option<String>,

    /// Network interface to probe from.
    #[arg(short, long)]
    interface: Option<String>,

    /// Seconds between scans in --watch mode.
    #[arg(long)]
    interval: Option<u64>,

    /// Run a single scan, print it, and exit.
    #[arg(long)]
    once: bool,

    /// Scan periodically and print each new snapshot. Reads replacement
    /// subnets from stdin, one per line.
    #[arg(long)]
    watch: bool,

    /// Print snapshots as JSON.
    #[arg(long)]
    json: bool,

    /// Config file prefix (default: radar).
    #[arg(short, long, default_value = DEFAULT_CONFIG_PREFIX)]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut radar_config = RadarConfig::load(&cli.config)?;
    if let Some(cidr) = &cli.subnet {
        radar_config.subnet = Some(cidr.clone());
    }
    if let Some(interface) = &cli.interface {
        radar_config.interface = Some(interface.clone());
    }
    if let Some(secs) = cli.interval {
        radar_config.interval_secs = secs;
    }
    let scan_config = radar_config.to_scan_config()?;

    let prober = ArpProber::open(radar_config.interface.as_deref())?;
    tracing::info!(
        interface = %prober.interface_name(),
        source_ip = %prober.source_ip(),
        subnet = %scan_config.subnet,
        "ARP channel ready"
    );

    let table = Arc::new(DeviceTable::new());
    let scheduler = Arc::new(ScanScheduler::new(
        Arc::new(prober),
        HostClassifier::system(),
        Arc::clone(&table),
        scan_config.clone(),
    ));

    if cli.once {
        scheduler.scan_now().await;
        print_snapshot(&table.current(), cli.json)?;
    } else if cli.watch {
        run_watch(&scheduler, scan_config, cli.json).await?;
    } else {
        anyhow::bail!("Specify --once (single scan) or --watch (periodic scanning)");
    }

    Ok(())
}

async fn run_watch(
    scheduler: &Arc<ScanScheduler>,
    scan_config: ScanConfig,
    json: bool,
) -> anyhow::Result<()> {
    let mut snapshots = scheduler.table().subscribe();
    scheduler.start_periodic(scan_config)?;

    let input = Arc::clone(scheduler);
    let stdin_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match input.set_subnet(line) {
                Ok(subnet) => tracing::info!(subnet = %subnet, "Subnet accepted from stdin"),
                Err(e) => tracing::warn!(input = %line, error = %e, "Ignoring invalid subnet"),
            }
        }
    });

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Received shutdown signal");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                print_snapshot(&snapshot, json)?;
            }
        }
    }

    stdin_task.abort();
    scheduler.stop().await;
    Ok(())
}

fn print_snapshot(snapshot: &Snapshot, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
        return Ok(());
    }

    let subnet = snapshot
        .subnet()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{} devices found on {} at {}",
        snapshot.device_count(),
        subnet,
        snapshot.scanned_at().format("%H:%M:%S")
    );
    for device in snapshot {
        println!(
            "  {:<15}  {}  {:<8}  {}",
            device.ip.to_string(),
            device.mac,
            device.os_guess.as_str(),
            device.hostname
        );
    }
    Ok(())
}
