//! Serial port handling
//!
//! Opens the K-line adapter with the fixed W-Bus line settings.

use serialport::{SerialPortInfo, SerialPortType};
use tokio_serial::{DataBits, FlowControl, Parity, SerialStream, StopBits};
use tracing::info;

use super::{ProtocolError, DEFAULT_BAUD_RATE};

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// K-line adapters are almost always USB serial converters, so
/// ttyUSB* sorts first, then ttyACM*, then everything else by name.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List candidate serial devices in a deterministic order
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports.dedup_by(|a, b| a.name == b.name);
    ports
}

/// Open a serial device with W-Bus line settings (2400 baud, 8E1)
pub fn open_port(device: &str) -> Result<SerialStream, ProtocolError> {
    info!("W-Bus: opening {}", device);

    let builder = tokio_serial::new(device, DEFAULT_BAUD_RATE)
        .data_bits(DataBits::Eight)
        .parity(Parity::Even)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None);

    SerialStream::open(&builder)
        .map_err(|e| ProtocolError::SerialError(format!("{}: {}", device, e)))
}
