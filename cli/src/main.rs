// blueprobe: BLE discovery service and command line
//
// Runs scan sessions against a host Bluetooth adapter and exposes them over
// HTTP, or drives single operations from the terminal.

mod config;
mod lookup;
mod radio;
mod server;
mod transfer;

use anyhow::{Context, Result};
use blueprobe_core::validate::{validate_lookup_address, validate_transfer};
use blueprobe_core::{ConnectionManager, Device, ScanConfig, ScanController};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "blueprobe")]
#[command(about = "BlueProbe: BLE discovery service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one scan session and print the devices found
    Scan {
        #[arg(short, long)]
        window_ms: Option<u64>,
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Connect to a previously discovered peripheral
    Connect { id: String },
    /// Look up the vendor of a hardware address
    Lookup { mac: String },
    /// Send a file to a paired device
    Send { address: String, file: PathBuf },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    let _log_guard = init_logging(default_level, config.log_dir.as_deref())?;

    match cli.command {
        Commands::Serve { port } => cmd_serve(config, port).await,
        Commands::Scan { window_ms, json } => cmd_scan(config, window_ms, json).await,
        Commands::Connect { id } => cmd_connect(config, id).await,
        Commands::Lookup { mac } => cmd_lookup(config, mac).await,
        Commands::Send { address, file } => cmd_send(config, address, file).await,
        Commands::Config { action } => cmd_config(config, action),
    }
}

/// Install the subscriber. With a log directory, output goes to a daily
/// rolling file and the returned guard must live until exit.
fn init_logging(default_level: &str, log_dir: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).context("Failed to create log directory")?;
            let appender = tracing_appender::rolling::daily(dir, "blueprobe.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

async fn open_radio(config: &config::Config) -> Result<Arc<radio::BtleRadio>> {
    let radio = radio::BtleRadio::open(config.scan.adapter_index)
        .await
        .context("Failed to open Bluetooth adapter")?;
    Ok(Arc::new(radio))
}

async fn cmd_serve(config: config::Config, port: Option<u16>) -> Result<()> {
    let addr = config.socket_addr(port)?;
    let radio = open_radio(&config).await?;
    let scan_config = config.scan_config()?;

    let scanner = Arc::new(ScanController::new(radio.clone(), scan_config.clone())?);
    scanner
        .attach()
        .await
        .context("Failed to subscribe to radio events")?;

    let ctx = Arc::new(server::AppContext {
        scanner: scanner.clone(),
        connections: ConnectionManager::new(radio, scan_config.connect_timeout),
        vendor: lookup::VendorLookup::new(&config.vendor_lookup_url),
        transfer: transfer::FileTransfer::new(&config.transfer.sendto_command),
        upload_dir: config.upload_dir()?,
        start_time: Instant::now(),
    });

    println!("{}", "BlueProbe".bold());
    println!("  Radio:   {}", scanner.radio_state().to_string().bright_yellow());
    println!("  Window:  {} ms", config.scan.scan_window_ms);
    println!("  Listen:  {}", format!("http://{}", addr).bright_cyan());
    println!();
    println!("{}", "Press Ctrl+C to stop".dimmed());

    let server = server::start(addr, ctx);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!();
    println!("{}", "Shutting down...".yellow());
    scanner.shutdown().await;
    server.abort();

    Ok(())
}

async fn cmd_scan(config: config::Config, window_ms: Option<u64>, json: bool) -> Result<()> {
    let mut scan_config = config.scan_config()?;
    if let Some(ms) = window_ms {
        scan_config = ScanConfig::new(Duration::from_millis(ms))?
            .with_connect_timeout(scan_config.connect_timeout);
    }

    let radio = open_radio(&config).await?;
    let scanner = ScanController::new(radio, scan_config.clone())?;
    scanner
        .attach()
        .await
        .context("Failed to subscribe to radio events")?;

    if !json {
        println!(
            "{} ({} ms)...",
            "Scanning".bold(),
            scan_config.scan_window.as_millis()
        );
    }

    let devices = scanner.begin_scan().await;
    scanner.shutdown().await;
    let devices = devices?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else {
        print_devices(&devices);
    }
    Ok(())
}

fn print_devices(devices: &[Device]) {
    if devices.is_empty() {
        println!("{}", "No devices found.".dimmed());
        return;
    }

    println!("{} ({} total)", "Devices".bold(), devices.len());
    println!();
    for device in devices {
        let name = if device.is_named() {
            device.display_name.bright_cyan()
        } else {
            device.display_name.dimmed()
        };
        println!("  {} {} {} dBm", "•".bright_green(), name, device.signal_strength);
        println!("    ID:      {}", device.id.dimmed());
        if let Some(address) = &device.derived_address {
            println!("    Address: {}", address.bright_yellow());
        }
        if !device.service_identifiers.is_empty() {
            println!("    Services: {}", device.service_identifiers.join(", "));
        }
    }
}

async fn cmd_connect(config: config::Config, id: String) -> Result<()> {
    let radio = open_radio(&config).await?;
    let connect_timeout = config.scan_config()?.connect_timeout;
    let connections = ConnectionManager::new(radio, connect_timeout);

    let status = connections.connect(&id).await?;
    println!("{} Connected to {}", "✓".green(), status.id.bright_cyan());
    Ok(())
}

async fn cmd_lookup(config: config::Config, mac: String) -> Result<()> {
    let mac = validate_lookup_address(Some(mac.as_str()))?;
    let vendor = lookup::VendorLookup::new(&config.vendor_lookup_url);

    let response = vendor.lookup(mac).await?;
    println!("{}  {}", response.mac.bright_cyan(), response.data.trim());
    Ok(())
}

async fn cmd_send(config: config::Config, address: String, file: PathBuf) -> Result<()> {
    let request = validate_transfer(Some(address.as_str()), Some(file.as_path()))?;
    let transfer = transfer::FileTransfer::new(&config.transfer.sendto_command);

    let stdout = transfer.send(&request).await?;
    println!(
        "{} Sent {} to {}",
        "✓".green(),
        request.file.display(),
        request.address.bright_cyan()
    );
    if !stdout.trim().is_empty() {
        println!("{}", stdout.trim().dimmed());
    }
    Ok(())
}

fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{} = {}", key.bright_cyan(), value),
            None if config.list().iter().any(|(k, _)| *k == key) => {
                println!("{} = {}", key.bright_cyan(), "(unset)".dimmed())
            }
            None => anyhow::bail!("Unknown config key: {}", key),
        },

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<22} {}", key.bright_cyan(), value);
            }
        }

        ConfigAction::Path => {
            println!("{}", config::Config::config_file()?.display());
        }
    }

    Ok(())
}
