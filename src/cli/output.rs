use crate::cli::args::OutputFormat;
use crate::core::session::{ExecOutput, SessionSnapshot};
use crate::domain::config::{DeviceConfig, ReplComConfig};
use crate::infrastructure::serial::PortSummary;
use std::io::{self, Write};
use tabled::{Table, Tabled};

/// Output writer trait for different formats
pub trait OutputWriter {
    fn write_ports(&self, ports: &[PortSummary]) -> Result<(), OutputError>;
    fn write_config(&self, config: &ReplComConfig) -> Result<(), OutputError>;
    fn write_devices(&self, devices: &[DeviceConfig]) -> Result<(), OutputError>;
    fn write_exec(&self, result: &ExecOutput) -> Result<(), OutputError>;
    fn write_entries(&self, entries: &[String]) -> Result<(), OutputError>;
    fn write_snapshot(&self, snapshot: &SessionSnapshot) -> Result<(), OutputError>;
    fn write_message(&self, message: &str) -> Result<(), OutputError>;
    fn write_error(&self, error: &str) -> Result<(), OutputError>;
}

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<OutputError> for crate::domain::error::ReplComError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

/// Console output writer
pub struct ConsoleWriter {
    format: OutputFormat,
}

impl ConsoleWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn print_json<T: serde::Serialize + ?Sized>(&self, value: &T) -> Result<(), OutputError> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

impl OutputWriter for ConsoleWriter {
    fn write_ports(&self, ports: &[PortSummary]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                if ports.is_empty() {
                    println!("No serial ports found");
                }
                for port in ports {
                    if port.description.is_empty() {
                        println!("{} ({})", port.name, port.kind);
                    } else {
                        println!("{} ({}) {}", port.name, port.kind, port.description);
                    }
                }
            }
            OutputFormat::Json => self.print_json(ports)?,
            OutputFormat::Table => {
                if !ports.is_empty() {
                    let rows: Vec<PortRow> = ports.iter().map(PortRow::from).collect();
                    println!("{}", Table::new(rows));
                }
            }
            OutputFormat::Csv => {
                println!("name,kind,description");
                for port in ports {
                    println!("{},{},{}", port.name, port.kind, csv_field(&port.description));
                }
            }
        }
        Ok(())
    }

    fn write_config(&self, config: &ReplComConfig) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => self.print_json(config)?,
            OutputFormat::Text | OutputFormat::Table | OutputFormat::Csv => {
                println!("ReplCom Configuration:");
                println!("  Log level: {}", config.global.log_level);
                println!("  Default baud rate: {}", config.global.default_baud_rate);
                if config.global.scan_timeout_ms == 0 {
                    println!("  Scan timeout: none");
                } else {
                    println!("  Scan timeout: {}ms", config.global.scan_timeout_ms);
                }
                println!("  Interrupt before raw mode: {}", config.global.interrupt_before_raw);
                println!("  Devices: {}", config.devices.len());
                if !config.devices.is_empty() {
                    self.write_devices(&config.devices)?;
                }
            }
        }
        Ok(())
    }

    fn write_devices(&self, devices: &[DeviceConfig]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                for device in devices {
                    println!("Device: {}", device.name);
                    if !device.description.is_empty() {
                        println!("  Description: {}", device.description);
                    }
                    println!("  Port: {}", device.serial.port);
                    println!("  Baud rate: {}", device.serial.baud_rate);
                }
            }
            OutputFormat::Json => self.print_json(devices)?,
            OutputFormat::Table => {
                if !devices.is_empty() {
                    let rows: Vec<DeviceRow> = devices.iter().map(DeviceRow::from).collect();
                    println!("{}", Table::new(rows));
                }
            }
            OutputFormat::Csv => {
                println!("name,port,baud_rate,description");
                for device in devices {
                    println!(
                        "{},{},{},{}",
                        device.name,
                        device.serial.port,
                        device.serial.baud_rate,
                        csv_field(&device.description)
                    );
                }
            }
        }
        Ok(())
    }

    fn write_exec(&self, result: &ExecOutput) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => self.print_json(result)?,
            _ => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(result.output.as_bytes())?;
                stdout.flush()?;
                if !result.error.is_empty() {
                    let mut stderr = io::stderr().lock();
                    stderr.write_all(result.error.as_bytes())?;
                    stderr.flush()?;
                }
            }
        }
        Ok(())
    }

    fn write_entries(&self, entries: &[String]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => self.print_json(entries)?,
            _ => {
                for entry in entries {
                    println!("{}", entry);
                }
            }
        }
        Ok(())
    }

    fn write_snapshot(&self, snapshot: &SessionSnapshot) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                println!("Session: {}", snapshot.session_id);
                println!("  State: {}", snapshot.state);
                if let Some(port) = &snapshot.port {
                    println!("  Port: {}", port);
                }
                println!("  Statistics:");
                println!("    Bytes sent: {}", snapshot.statistics.bytes_sent);
                println!("    Bytes received: {}", snapshot.statistics.bytes_received);
                println!("    Transactions: {}", snapshot.statistics.transactions);
                println!("    Failed transactions: {}", snapshot.statistics.failed_transactions);
                println!("    Errors: {}", snapshot.statistics.error_count);
                println!("  Peak read leases: {}", snapshot.leases.peak_reads);
            }
            OutputFormat::Json => self.print_json(snapshot)?,
            OutputFormat::Table => {
                println!("{}", Table::new(vec![SnapshotRow::from(snapshot)]));
            }
            OutputFormat::Csv => {
                println!("id,state,bytes_sent,bytes_received,transactions,failed_transactions,error_count");
                println!(
                    "{},{},{},{},{},{},{}",
                    snapshot.session_id,
                    snapshot.state,
                    snapshot.statistics.bytes_sent,
                    snapshot.statistics.bytes_received,
                    snapshot.statistics.transactions,
                    snapshot.statistics.failed_transactions,
                    snapshot.statistics.error_count
                );
            }
        }
        Ok(())
    }

    fn write_message(&self, message: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => self.print_json(&serde_json::json!({ "message": message }))?,
            _ => println!("{}", message),
        }
        Ok(())
    }

    fn write_error(&self, error: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                eprintln!("{}", serde_json::to_string_pretty(&serde_json::json!({ "error": error }))?)
            }
            _ => eprintln!("Error: {}", error),
        }
        Ok(())
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[derive(Tabled)]
struct PortRow {
    #[tabled(rename = "Port")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Description")]
    description: String,
}

impl From<&PortSummary> for PortRow {
    fn from(port: &PortSummary) -> Self {
        Self {
            name: port.name.clone(),
            kind: port.kind.clone(),
            description: port.description.clone(),
        }
    }
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Port")]
    port: String,
    #[tabled(rename = "Baud")]
    baud_rate: u32,
    #[tabled(rename = "Description")]
    description: String,
}

impl From<&DeviceConfig> for DeviceRow {
    fn from(device: &DeviceConfig) -> Self {
        Self {
            name: device.name.clone(),
            port: device.serial.port.clone(),
            baud_rate: device.serial.baud_rate,
            description: device.description.clone(),
        }
    }
}

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "Session")]
    session_id: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Sent")]
    bytes_sent: u64,
    #[tabled(rename = "Received")]
    bytes_received: u64,
    #[tabled(rename = "Transactions")]
    transactions: u64,
    #[tabled(rename = "Errors")]
    errors: u64,
}

impl From<&SessionSnapshot> for SnapshotRow {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            session_id: snapshot.session_id.clone(),
            state: snapshot.state.to_string(),
            bytes_sent: snapshot.statistics.bytes_sent,
            bytes_received: snapshot.statistics.bytes_received,
            transactions: snapshot.statistics.transactions,
            errors: snapshot.statistics.error_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_device_row_table() {
        let device = DeviceConfig {
            name: "pico".to_string(),
            description: "bench board".to_string(),
            serial: crate::domain::config::SerialSettings::new("/dev/ttyACM0", 115_200),
        };
        let table = Table::new(vec![DeviceRow::from(&device)]).to_string();
        assert!(table.contains("pico"));
        assert!(table.contains("115200"));
    }
}
