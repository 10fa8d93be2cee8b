use crate::domain::error::ReplComResult;
use serde::Serialize;
use serialport::{SerialPortInfo, SerialPortType};

/// One serial port visible on this machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortSummary {
    pub name: String,
    pub kind: String,
    pub description: String,
}

impl From<SerialPortInfo> for PortSummary {
    fn from(info: SerialPortInfo) -> Self {
        let (kind, description) = match info.port_type {
            SerialPortType::UsbPort(usb) => {
                let label = [usb.manufacturer, usb.product]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                let ids = format!("{:04x}:{:04x}", usb.vid, usb.pid);
                let description = if label.is_empty() {
                    ids
                } else {
                    format!("{} ({})", label, ids)
                };
                ("usb".to_string(), description)
            }
            SerialPortType::BluetoothPort => ("bluetooth".to_string(), String::new()),
            SerialPortType::PciPort => ("pci".to_string(), String::new()),
            SerialPortType::Unknown => ("unknown".to_string(), String::new()),
        };
        Self {
            name: info.port_name,
            kind,
            description,
        }
    }
}

/// Serial ports the OS reports, sorted by name.
pub fn list_ports() -> ReplComResult<Vec<PortSummary>> {
    let mut ports: Vec<PortSummary> = serialport::available_ports()?
        .into_iter()
        .map(PortSummary::from)
        .collect();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(ports)
}
