//! Serial port discovery

use miette::{IntoDiagnostic, Result};
use serialport::{SerialPortInfo, SerialPortType};

/// Enumerate the serial ports a target could plausibly be wired to.
///
/// PCI and Bluetooth ports are filtered out; USB adapters and platform
/// UARTs remain.
pub(super) fn detect_serial_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().into_diagnostic()?;

    Ok(ports
        .into_iter()
        .filter(|port| {
            matches!(
                port.port_type,
                SerialPortType::UsbPort(_) | SerialPortType::Unknown
            )
        })
        .collect())
}
