//! bulkcat
//!
//! Binds the bulk driver core to a libusb device and streams data through
//! it: inbound data to stdout, stdin to the device.

mod config;
mod usb;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use common::setup_logging;
use config::{Config, DeviceFilter};
use driver::{Attachment, DriverError, FileContext, HandleTable, OpenOptions};
use std::io::{Read, Write};
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use usb::RusbTransport;

/// How long a session gets to notice an interrupt before we detach anyway
const INTERRUPT_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "bulkcat")]
#[command(author, version, about = "Stream data over a USB bulk endpoint pair")]
#[command(long_about = "
Binds the bulk driver core to a USB device and streams data through it.

EXAMPLES:
    # List devices with a bulk in/out pair
    bulkcat list

    # Dump inbound data to stdout
    bulkcat read --device 0x078b:0x0010 > capture.bin

    # Send a file
    bulkcat write --device 0x078b:0x0010 < payload.bin

CONFIGURATION:
    bulkcat looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/bulkdev/bulkcat.toml
    3. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List devices admitted by the filters that expose a bulk pair
    List,

    /// Stream inbound data to stdout
    Read {
        /// Device to bind, as VID:PID (e.g. 0x078b:0x0010)
        #[arg(short, long)]
        device: String,

        /// Stop after this many bytes
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Return what is immediately available instead of waiting
        #[arg(long)]
        nonblock: bool,
    },

    /// Stream stdin to the device
    Write {
        /// Device to bind, as VID:PID (e.g. 0x078b:0x0010)
        #[arg(short, long)]
        device: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = Config::default();
        let path = Config::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let (config, fallback) = match args.config {
        Some(ref path) => (
            Config::load(Some(path.clone())).context("Failed to load configuration")?,
            None,
        ),
        None => match Config::load_or_default() {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        },
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("bulkcat v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = fallback {
        warn!("{:#}; using defaults", e);
    }

    match args.command {
        None | Some(Command::List) => list_devices(&config),
        Some(Command::Read {
            device,
            count,
            nonblock,
        }) => {
            run_session(config, &device, nonblock, move |file| stream_in(file, count)).await
        }
        Some(Command::Write { device }) => {
            run_session(config, &device, false, stream_out).await
        }
    }
}

/// List devices and exit
fn list_devices(config: &Config) -> Result<()> {
    let context = rusb::Context::new().context("Failed to create USB context")?;
    let devices = usb::enumerate(&context, |id| config.usb.allows(id))?;

    if devices.is_empty() {
        println!("No matching USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for (device, interface) in devices {
        let (manufacturer, product) = device.strings();
        println!(
            "  {} - {} {}",
            device.id(),
            manufacturer.as_deref().unwrap_or("Unknown Manufacturer"),
            product.as_deref().unwrap_or("Unknown Product")
        );
        println!(
            "      Bus {:03} Device {:03} Interface {}",
            device.bus_number(),
            device.device_address(),
            interface.number
        );
        if let Some((bulk_in, bulk_out)) = interface.find_bulk_pair() {
            println!(
                "      Bulk IN {:#04x} ({} bytes)  Bulk OUT {:#04x} ({} bytes)",
                bulk_in.address, bulk_in.max_packet_size, bulk_out.address, bulk_out.max_packet_size
            );
        }
        println!();
    }

    Ok(())
}

/// Attach the first device matching `filter`, run `session` on an open file,
/// then detach
async fn run_session<F>(config: Config, filter: &str, nonblocking: bool, session: F) -> Result<()>
where
    F: FnOnce(FileContext) -> Result<u64> + Send + 'static,
{
    let filter = DeviceFilter::parse(filter)?;
    let context = rusb::Context::new().context("Failed to create USB context")?;
    let (device, interface) = usb::enumerate(&context, |id| filter.matches(id))?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No device with a bulk endpoint pair matches the filter"))?;

    let transport = RusbTransport::open(&device, interface, config.usb.transfer_timeout())
        .context("Failed to open device")?;

    let table = HandleTable::new(&config.driver);
    let attachment = Attachment::attach(Box::new(transport), &table, &config.driver)
        .context("Failed to attach device")?;
    let file = OpenOptions::new()
        .nonblocking(nonblocking)
        .open(&table, attachment.minor())
        .context("Failed to open device node")?;
    let interrupt = file.interrupter();
    info!("Using {} as {}", device.id(), attachment.node_name());

    let mut task = tokio::task::spawn_blocking(move || session(file));
    let result = tokio::select! {
        joined = &mut task => joined.context("Session task panicked")?,
        _ = signal::ctrl_c() => {
            info!("Interrupted, stopping");
            interrupt.raise();
            match tokio::time::timeout(INTERRUPT_GRACE, task).await {
                Ok(joined) => joined.context("Session task panicked")?,
                Err(_) => {
                    warn!("Session did not stop within {:?}", INTERRUPT_GRACE);
                    Ok(0)
                }
            }
        }
    };

    tokio::task::spawn_blocking(move || attachment.detach())
        .await
        .context("Detach task panicked")?;

    let transferred = result?;
    info!("Transferred {} bytes", transferred);
    Ok(())
}

/// Copy inbound data to stdout until end of file, `count` bytes, or an
/// interrupt
fn stream_in(file: FileContext, count: Option<u64>) -> Result<u64> {
    let mut buffer = vec![0u8; file.device().bulk_in_size().max(1)];
    let mut stdout = std::io::stdout().lock();
    let mut total = 0u64;

    loop {
        let want = match count {
            Some(limit) if total >= limit => break,
            Some(limit) => buffer.len().min((limit - total) as usize),
            None => buffer.len(),
        };

        match file.read(&mut buffer, want) {
            Ok(0) => break,
            Ok(n) => {
                stdout
                    .write_all(&buffer[..n])
                    .context("Failed to write to stdout")?;
                total += n as u64;
            }
            Err(DriverError::WouldBlock | DriverError::Interrupted) => break,
            Err(e) => return Err(e).context("Read failed"),
        }
    }

    stdout.flush().context("Failed to flush stdout")?;
    file.release()?;
    Ok(total)
}

/// Copy stdin to the device in `max_transfer` chunks, then flush
fn stream_out(file: FileContext) -> Result<u64> {
    let mut buffer = vec![0u8; file.device().max_transfer()];
    let mut stdin = std::io::stdin().lock();
    let mut total = 0u64;

    loop {
        let n = stdin.read(&mut buffer).context("Failed to read stdin")?;
        if n == 0 {
            break;
        }

        let mut offset = 0;
        while offset < n {
            match file.write(&buffer[offset..n], n - offset) {
                Ok(accepted) => offset += accepted,
                Err(DriverError::Interrupted) => return Ok(total + offset as u64),
                Err(e) => return Err(e).context("Write failed"),
            }
        }
        total += n as u64;
    }

    match file.flush() {
        Ok(()) => {}
        Err(DriverError::Interrupted) => {}
        Err(e) => return Err(e).context("Flush failed"),
    }
    file.release()?;
    Ok(total)
}
