//! usbh
//!
//! Command line front end for the USB handle adapter. Finds a device by
//! vendor and product ID (or by a configured alias), runs one request against
//! it and closes it again.

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use common::{ControlSetup, PipeProperties, setup_logging};
use serde::Serialize;
use tracing::{info, warn};
use usb_adapter::config::AdapterConfig;
use usb_adapter::{InterfaceHandle, LibUsbBackend, UsbAdapter};

#[derive(Parser, Debug)]
#[command(name = "usbh")]
#[command(author, version, about = "USB handle adapter - talk to a USB device from the shell")]
#[command(long_about = "
Finds interface 0 of configuration 1 on a USB device, runs a single control
request or pipe transfer against it and closes it again.

EXAMPLES:
    # List attached devices
    usbh list

    # Show the pipe table of an ST-Link
    usbh probe --vid 0x0483 --pid 0x5740

    # Same, using an alias from the config file
    usbh probe --device stlink

    # GET_DESCRIPTOR(device), 18 bytes
    usbh control --vid 0x0483 --pid 0x5740 --request-type 0x80 --request 6 \\
        --value 0x0100 --index 0 --length 18

    # Bulk transfers
    usbh write --device stlink --pipe 2 --data 'f1 80'
    usbh read --device stlink --pipe 1 --size 64

CONFIGURATION:
    Device aliases are read from the following locations, in order:
    1. Path specified with --config
    2. ~/.config/usb-adapter/config.toml
    3. /etc/usb-adapter/config.toml
    4. Built-in defaults (no aliases)
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached USB devices
    List {
        #[arg(long)]
        json: bool,
    },

    /// Open a device's interface and print its pipe table
    Probe {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        json: bool,
    },

    /// Control request on the interface's default pipe
    Control {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        setup: SetupArgs,

        /// Data stage for host-to-device requests, as hex bytes
        #[arg(long, value_name = "HEX")]
        data: Option<String>,
    },

    /// Read from a pipe
    Read {
        #[command(flatten)]
        target: Target,

        #[arg(long, value_parser = parse_number::<u8>)]
        pipe: u8,

        #[arg(long, value_parser = parse_number::<usize>)]
        size: usize,
    },

    /// Write hex bytes to a pipe
    Write {
        #[command(flatten)]
        target: Target,

        #[arg(long, value_parser = parse_number::<u8>)]
        pipe: u8,

        #[arg(long, value_name = "HEX")]
        data: String,
    },

    /// Control request on the whole device, without opening an interface
    DeviceRequest {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        setup: SetupArgs,

        #[arg(long, value_name = "HEX")]
        data: Option<String>,
    },
}

/// Which device to talk to
#[derive(clap::Args, Debug)]
struct Target {
    /// Device alias from the configuration file
    #[arg(short, long, conflicts_with_all = ["vid", "pid"], required_unless_present = "vid")]
    device: Option<String>,

    /// Vendor ID (decimal or 0x hex)
    #[arg(long, value_parser = parse_number::<u16>, requires = "pid")]
    vid: Option<u16>,

    /// Product ID (decimal or 0x hex)
    #[arg(long, value_parser = parse_number::<u16>, requires = "vid")]
    pid: Option<u16>,
}

#[derive(clap::Args, Debug)]
struct SetupArgs {
    #[arg(long, value_parser = parse_number::<u8>)]
    request_type: u8,

    #[arg(long, value_parser = parse_number::<u8>)]
    request: u8,

    #[arg(long, value_parser = parse_number::<u16>, default_value = "0")]
    value: u16,

    #[arg(long, value_parser = parse_number::<u16>, default_value = "0")]
    index: u16,

    #[arg(long, value_parser = parse_number::<u16>, default_value = "0")]
    length: u16,
}

impl SetupArgs {
    fn to_setup(&self) -> ControlSetup {
        ControlSetup {
            request_type: self.request_type,
            request: self.request,
            value: self.value,
            index: self.index,
            length: self.length,
        }
    }
}

#[derive(Serialize)]
struct ProbeReport {
    vendor_id: u16,
    product_id: u16,
    pipes: Vec<PipeProperties>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = AdapterConfig::default();
        let path = AdapterConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        usb_adapter::config::load_config(path).context("Failed to load configuration")?
    } else {
        AdapterConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usbh v{}", env!("CARGO_PKG_VERSION"));

    let Some(command) = args.command else {
        println!("No command given, see --help");
        return Ok(());
    };

    let backend = LibUsbBackend::new().context("Failed to initialize libusb")?;
    let adapter = UsbAdapter::new(backend);

    match command {
        Command::List { json } => list_devices(&adapter, json),
        Command::Probe { target, json } => {
            let (vendor_id, product_id) = resolve_target(&target, &config)?;
            let pipes = with_interface(&adapter, vendor_id, product_id, |adapter, handle| {
                Ok(adapter.pipes(handle)?)
            })?;
            print_pipes(vendor_id, product_id, pipes, json)
        }
        Command::Control {
            target,
            setup,
            data,
        } => {
            let (vendor_id, product_id) = resolve_target(&target, &config)?;
            let setup = setup.to_setup();
            let mut buffer = data_stage(&setup, data.as_deref())?;
            let count = with_interface(&adapter, vendor_id, product_id, |adapter, handle| {
                Ok(adapter.control(handle, setup, &mut buffer)?)
            })?;
            report_control(&setup, &buffer[..count]);
            Ok(())
        }
        Command::Read { target, pipe, size } => {
            let (vendor_id, product_id) = resolve_target(&target, &config)?;
            let mut buffer = vec![0u8; size];
            let count = with_interface(&adapter, vendor_id, product_id, |adapter, handle| {
                Ok(adapter.read(handle, pipe, &mut buffer)?)
            })?;
            println!("{}", format_hex(&buffer[..count]));
            Ok(())
        }
        Command::Write { target, pipe, data } => {
            let (vendor_id, product_id) = resolve_target(&target, &config)?;
            let bytes = parse_hex_data(&data)?;
            with_interface(&adapter, vendor_id, product_id, |adapter, handle| {
                Ok(adapter.write(handle, pipe, &bytes)?)
            })?;
            println!("Wrote {} byte(s) to pipe {}", bytes.len(), pipe);
            Ok(())
        }
        Command::DeviceRequest {
            target,
            setup,
            data,
        } => {
            let (vendor_id, product_id) = resolve_target(&target, &config)?;
            let setup = setup.to_setup();
            let mut buffer = data_stage(&setup, data.as_deref())?;

            let mut device = adapter
                .find_whole_device(vendor_id, product_id)?
                .ok_or_else(|| anyhow!("No device {:04x}:{:04x} found", vendor_id, product_id))?;
            let result = adapter.device_request(&mut device, setup, &mut buffer);
            adapter.close_device(device);
            result?;

            println!("{}", describe_device_response(&setup, &buffer));
            Ok(())
        }
    }
}

fn list_devices(adapter: &UsbAdapter<LibUsbBackend>, json: bool) -> Result<()> {
    let devices = adapter.list_devices()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No USB devices found.");
    } else {
        println!("Found {} USB device(s):\n", devices.len());
        for device in devices {
            println!(
                "  Bus {:03} Device {:03}: {:04x}:{:04x}",
                device.bus_number, device.address, device.vendor_id, device.product_id
            );
        }
    }
    Ok(())
}

fn print_pipes(
    vendor_id: u16,
    product_id: u16,
    pipes: Vec<PipeProperties>,
    json: bool,
) -> Result<()> {
    if json {
        let report = ProbeReport {
            vendor_id,
            product_id,
            pipes,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Interface 0 of {:04x}:{:04x}:\n", vendor_id, product_id);
    println!("  pipe  dir  number  type         size  interval");
    for (index, pipe) in pipes.iter().enumerate() {
        println!(
            "  {:>4}  {:<3}  {:>6}  {:<11}  {:>4}  {:>8}",
            index,
            format!("{:?}", pipe.direction),
            pipe.number,
            format!("{:?}", pipe.transfer_type),
            pipe.max_packet_size,
            pipe.interval
        );
    }
    Ok(())
}

/// Map an alias or a VID/PID pair to IDs
fn resolve_target(target: &Target, config: &AdapterConfig) -> Result<(u16, u16)> {
    if let Some(name) = &target.device {
        let alias = config
            .find_alias(name)
            .ok_or_else(|| anyhow!("Unknown device alias '{}'", name))?;
        return alias.ids();
    }

    match (target.vid, target.pid) {
        (Some(vendor_id), Some(product_id)) => Ok((vendor_id, product_id)),
        _ => bail!("Either --device or both --vid and --pid are required"),
    }
}

/// Open the device's interface, run `op` and close it again
///
/// The interface is closed even when `op` fails; the first error wins.
fn with_interface<T>(
    adapter: &UsbAdapter<LibUsbBackend>,
    vendor_id: u16,
    product_id: u16,
    op: impl FnOnce(&UsbAdapter<LibUsbBackend>, &mut InterfaceHandle<LibUsbBackend>) -> Result<T>,
) -> Result<T> {
    let mut handle = adapter
        .find_device(vendor_id, product_id)?
        .ok_or_else(|| {
            anyhow!(
                "No interface 0 found on {:04x}:{:04x}",
                vendor_id,
                product_id
            )
        })?;

    let result = op(adapter, &mut handle);

    match adapter.close(handle) {
        Ok(()) => result,
        Err((_handle, e)) if result.is_err() => {
            warn!("Close after failed request also failed: {}", e);
            result
        }
        Err((_handle, e)) => Err(e.into()),
    }
}

/// Buffer of `wLength` bytes, prefilled with `data` for host-to-device requests
fn data_stage(setup: &ControlSetup, data: Option<&str>) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; usize::from(setup.length)];
    if let Some(data) = data {
        if setup.is_in() {
            bail!("--data is only valid for host-to-device requests");
        }
        let bytes = parse_hex_data(data)?;
        if bytes.len() > buffer.len() {
            bail!(
                "--data has {} byte(s) but --length is {}",
                bytes.len(),
                setup.length
            );
        }
        buffer[..bytes.len()].copy_from_slice(&bytes);
    }
    Ok(buffer)
}

fn report_control(setup: &ControlSetup, data: &[u8]) {
    if setup.is_in() {
        println!("{}", format_hex(data));
    } else {
        println!("Sent {} byte(s)", data.len());
    }
}

/// Device requests report no byte count, so IN data is the whole buffer
fn describe_device_response(setup: &ControlSetup, data: &[u8]) -> String {
    if setup.is_in() {
        format!(
            "{}\n(byte count not reported; showing all {} requested byte(s))",
            format_hex(data),
            data.len()
        )
    } else {
        format!("Sent {} byte(s)", data.len())
    }
}

/// Decimal, or hex with a `0x` prefix
fn parse_number<T: TryFrom<u64>>(s: &str) -> Result<T, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    }
    .map_err(|e| format!("invalid number '{}': {}", s, e))?;

    T::try_from(parsed).map_err(|_| format!("{} is out of range", s))
}

/// Hex bytes, optionally separated by whitespace, colons or commas
fn parse_hex_data(s: &str) -> Result<Vec<u8>> {
    let digits: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != ',')
        .collect();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(&digits);

    if !digits.is_ascii() {
        bail!("Hex data '{}' contains non-hex characters", s);
    }
    if digits.len() % 2 != 0 {
        bail!("Hex data '{}' has an odd number of digits", s);
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("Invalid hex byte '{}'", &digits[i..i + 2]))
        })
        .collect()
}

fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join(" ")
}
