//! Serial device discovery.

use crate::error::{Error, Result};
use serialport::{SerialPortInfo, SerialPortType};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Text a port can be matched on: port name plus USB descriptor strings.
pub fn port_description(info: &SerialPortInfo) -> String {
    match &info.port_type {
        SerialPortType::UsbPort(usb) => {
            let mut parts = vec![info.port_name.clone()];
            parts.extend(usb.manufacturer.clone());
            parts.extend(usb.product.clone());
            parts.extend(usb.serial_number.clone().map(|s| format!("SN {s}")));
            parts.push(format!("{:04x}:{:04x}", usb.vid, usb.pid));
            parts.join(" ")
        }
        SerialPortType::BluetoothPort => format!("{} (bluetooth)", info.port_name),
        SerialPortType::PciPort => format!("{} (pci)", info.port_name),
        SerialPortType::Unknown => info.port_name.clone(),
    }
}

/// Whether `info` matches `pattern` (case-insensitive substring).
pub fn port_matches(info: &SerialPortInfo, pattern: &str) -> bool {
    port_description(info)
        .to_lowercase()
        .contains(&pattern.to_lowercase())
}

pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    Ok(serialport::available_ports()?)
}

/// First port whose description contains `pattern`.
pub fn find_port(pattern: &str) -> Result<SerialPortInfo> {
    let ports = list_ports()?;
    debug!(count = ports.len(), "Enumerated serial ports");
    ports
        .into_iter()
        .find(|p| port_matches(p, pattern))
        .ok_or_else(|| Error::DeviceNotFound(pattern.to_string()))
}

/// Retry [`find_port`] every `retry` until the board shows up.
pub async fn wait_for_port(pattern: &str, retry: Duration) -> Result<SerialPortInfo> {
    loop {
        match find_port(pattern) {
            Ok(info) => {
                info!(port = %info.port_name, description = %port_description(&info), "Found sensor board");
                return Ok(info);
            }
            Err(Error::DeviceNotFound(_)) => {
                warn!(pattern, "Cannot find the device. Please check that it is connected");
                tokio::time::sleep(retry).await;
            }
            Err(e) => return Err(e),
        }
    }
}
