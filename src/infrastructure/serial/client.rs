use crate::core::communication::{
    ByteWriter, ChannelReader, Chunk, Closer, Connection, Transport, TransportType,
};
use crate::domain::config::{FlowControlConfig, ParityConfig, SerialSettings};
use crate::domain::error::{ReplComError, ReplComResult};
use async_trait::async_trait;
use serialport::{SerialPort, SerialPortBuilder};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Read timeout of the pump; bounds how long `close` waits for it to notice.
const READ_TIMEOUT: Duration = Duration::from_millis(100);
const READ_BUFFER_SIZE: usize = 1024;

/// Transport over a local serial port.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialTransport;

impl SerialTransport {
    pub fn new() -> Self {
        Self
    }
}

/// Map link settings onto a port builder.
pub fn port_builder(settings: &SerialSettings) -> ReplComResult<SerialPortBuilder> {
    let mut builder = serialport::new(&settings.port, settings.baud_rate);

    builder = builder.data_bits(match settings.data_bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        8 => serialport::DataBits::Eight,
        other => {
            return Err(ReplComError::InvalidInput(format!(
                "Invalid data bits: {}",
                other
            )))
        }
    });

    builder = builder.stop_bits(match settings.stop_bits {
        1 => serialport::StopBits::One,
        2 => serialport::StopBits::Two,
        other => {
            return Err(ReplComError::InvalidInput(format!(
                "Invalid stop bits: {}",
                other
            )))
        }
    });

    builder = builder.parity(match settings.parity {
        ParityConfig::None => serialport::Parity::None,
        ParityConfig::Even => serialport::Parity::Even,
        ParityConfig::Odd => serialport::Parity::Odd,
    });

    builder = builder.flow_control(match settings.flow_control {
        FlowControlConfig::None => serialport::FlowControl::None,
        FlowControlConfig::Software => serialport::FlowControl::Software,
        FlowControlConfig::Hardware => serialport::FlowControl::Hardware,
    });

    Ok(builder.timeout(READ_TIMEOUT))
}

#[async_trait]
impl Transport for SerialTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Serial
    }

    async fn open(&self, settings: &SerialSettings) -> ReplComResult<Connection> {
        let builder = port_builder(settings)?;
        let port = builder.open().map_err(|e| ReplComError::OpenFailure {
            message: format!("{}: {}", settings.port, e),
        })?;
        let write_port = port.try_clone().map_err(|e| ReplComError::OpenFailure {
            message: format!("{}: could not clone port handle: {}", settings.port, e),
        })?;
        info!("Serial port {} opened at {} baud", settings.port, settings.baud_rate);

        let stop = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = mpsc::unbounded_channel();
        let pump = spawn_pump(port, sender, Arc::clone(&stop), settings.port.clone());

        Ok(Connection {
            settings: settings.clone(),
            transport_type: TransportType::Serial,
            reader: Box::new(ChannelReader::new(receiver)),
            writer: Box::new(SerialWriter {
                port: Arc::new(Mutex::new(write_port)),
            }),
            closer: Box::new(SerialCloser {
                stop,
                pump: Mutex::new(Some(pump)),
                port_name: settings.port.clone(),
            }),
        })
    }
}

/// Blocking read loop feeding the connection's channel.
fn spawn_pump(
    mut port: Box<dyn SerialPort>,
    sender: mpsc::UnboundedSender<Chunk>,
    stop: Arc<AtomicBool>,
    port_name: String,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        while !stop.load(Ordering::SeqCst) {
            match port.read(&mut buffer) {
                Ok(0) => continue,
                Ok(n) => {
                    debug!("Received {} bytes from {}", n, port_name);
                    if sender.send(Ok(buffer[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Failed to read from {}: {}", port_name, e);
                    let _ = sender.send(Err(ReplComError::transport(format!(
                        "read from {} failed: {}",
                        port_name, e
                    ))));
                    break;
                }
            }
        }
        debug!("Read pump for {} stopped", port_name);
    })
}

struct SerialWriter {
    port: Arc<Mutex<Box<dyn SerialPort>>>,
}

#[async_trait]
impl ByteWriter for SerialWriter {
    async fn write_all(&mut self, data: &[u8]) -> ReplComResult<()> {
        let port = Arc::clone(&self.port);
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut port = port.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            port.write_all(&data)?;
            port.flush()
        })
        .await
        .map_err(|e| ReplComError::transport(format!("write task failed: {}", e)))?
        .map_err(|e| ReplComError::transport(format!("write failed: {}", e)))
    }
}

struct SerialCloser {
    stop: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
    port_name: String,
}

#[async_trait]
impl Closer for SerialCloser {
    async fn close(&self) -> ReplComResult<()> {
        self.stop.store(true, Ordering::SeqCst);
        let pump = self
            .pump
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                warn!("Read pump for {} ended abnormally: {}", self.port_name, e);
            }
        }
        info!("Serial port {} closed", self.port_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_rejects_invalid_data_bits() {
        let mut settings = SerialSettings::new("/dev/ttyACM0", 115_200);
        settings.data_bits = 9;
        assert!(matches!(
            port_builder(&settings),
            Err(ReplComError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_builder_rejects_invalid_stop_bits() {
        let mut settings = SerialSettings::new("/dev/ttyACM0", 115_200);
        settings.stop_bits = 3;
        assert!(port_builder(&settings).is_err());
    }

    #[tokio::test]
    async fn test_open_missing_port_fails_gracefully() {
        let transport = SerialTransport::new();
        let result = transport
            .open(&SerialSettings::new("/dev/replcom-no-such-port", 115_200))
            .await;
        assert!(matches!(result, Err(ReplComError::OpenFailure { .. })));
    }
}
