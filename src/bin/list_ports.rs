use anyhow::Result;
use clap::Parser;
use serialport::SerialPortType;
use tracing::info;

use harvester_lib::constants::DEFAULT_PORT_PATTERN;
use harvester_lib::ports::{list_ports, port_description, port_matches};

/// Lists serial ports and marks the ones the acquisition would pick.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Text matched against port descriptions.
    #[arg(long, default_value = DEFAULT_PORT_PATTERN)]
    pattern: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_target(false).init();

    info!("Listing serial ports...\n");

    let ports = list_ports()?;
    for (n, port) in ports.iter().enumerate() {
        let marker = if port_matches(port, &cli.pattern) { " <- match" } else { "" };
        info!("Port #{}: {}{}", n + 1, port_description(port), marker);
        if let SerialPortType::UsbPort(usb) = &port.port_type {
            info!("  VID: {:#06x}, PID: {:#06x}", usb.vid, usb.pid);
            info!("  Manufacturer: {}", usb.manufacturer.as_deref().unwrap_or("<Not available>"));
            info!("  Product: {}", usb.product.as_deref().unwrap_or("<Not available>"));
            info!("  Serial: {}", usb.serial_number.as_deref().unwrap_or("<Not available>"));
        }
    }
    if ports.is_empty() {
        info!("No serial ports found.");
    }
    Ok(())
}
