//! Serial port communication
//!
//! Port discovery and the [`DeviceLink`] over a real serial port. The rig's
//! controller is an Arduino-class board, so only USB CDC/FTDI style ports
//! are offered.

use super::{ConnectionParams, DeviceLink};
use kneespa_core::ConnectionError;
use std::io::{Read, Write};
use std::time::Duration;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Arduino Uno")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            vid: None,
            pid: None,
        }
    }
}

/// List serial ports the rig could be attached to
///
/// - Windows: COM*
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>, ConnectionError> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        ConnectionError::SerialError {
            reason: format!("Failed to enumerate ports: {}", e),
        }
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_candidate_port(&port.port_name))
        .map(|port| {
            let mut info = SerialPortInfo::new(&port.port_name, port_description(port));
            if let serialport::SerialPortType::UsbPort(usb) = &port.port_type {
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
                info.manufacturer = usb.manufacturer.clone();
            }
            info
        })
        .collect())
}

/// Check if a port name looks like a USB serial adapter
pub fn is_candidate_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Open serial port
pub struct SerialLink {
    name: String,
    port: Box<dyn serialport::SerialPort>,
}

impl SerialLink {
    /// Open a serial port, 8N1 without flow control
    pub fn open(params: &ConnectionParams) -> Result<Self, ConnectionError> {
        params.validate()?;

        let port = serialport::new(&params.port, params.baud_rate)
            .timeout(Duration::from_millis(params.timeout_ms))
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", params.port, e);
                ConnectionError::FailedToOpen {
                    port: params.port.clone(),
                    reason: e.to_string(),
                }
            })?;

        Ok(Self {
            name: params.port.clone(),
            port,
        })
    }
}

impl DeviceLink for SerialLink {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn split(self: Box<Self>) -> std::io::Result<(Box<dyn Read + Send>, Box<dyn Write + Send>)> {
        let reader = self.port.try_clone()?;
        Ok((Box::new(reader), Box::new(self.port)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_ports() {
        assert!(is_candidate_port("/dev/ttyACM0"));
        assert!(is_candidate_port("/dev/ttyUSB1"));
        assert!(is_candidate_port("COM3"));
        assert!(is_candidate_port("/dev/cu.usbmodem14101"));
        assert!(!is_candidate_port("/dev/ttyS0"));
        assert!(!is_candidate_port("COM"));
        assert!(!is_candidate_port("COMX"));
    }

    #[test]
    fn test_open_missing_port_fails() {
        let params = ConnectionParams::new("/dev/ttyACM-does-not-exist");
        assert!(matches!(
            SerialLink::open(&params),
            Err(ConnectionError::FailedToOpen { .. })
        ));
    }
}
