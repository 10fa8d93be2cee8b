//! In-memory device used by tests and the `demo` command.

use crate::core::communication::control::{ENTER_RAW, EXECUTE, EXIT_RAW, INTERRUPT};
use crate::core::communication::{
    ByteWriter, ChannelReader, Chunk, Closer, Connection, Transport, TransportType,
};
use crate::domain::config::SerialSettings;
use crate::domain::error::{ReplComError, ReplComResult};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// Handle on the far end of a mock connection.
///
/// Cloning shares the same device. The responder runs while the device state
/// is locked and must not call back into the device.
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

#[derive(Default)]
struct DeviceState {
    to_host: Option<mpsc::UnboundedSender<Chunk>>,
    connection_id: u64,
    written: Vec<u8>,
    writes: Vec<Vec<u8>>,
    responder: Option<Responder>,
    open_error: Option<String>,
    write_error: Option<String>,
    close_error: Option<String>,
    opens: usize,
    closes: usize,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device that answers like a raw REPL, running `handler` on each
    /// submitted program and replying with its `(output, error)`.
    pub fn raw_repl<F>(handler: F) -> Self
    where
        F: FnMut(&str) -> (String, String) + Send + 'static,
    {
        let device = Self::new();
        let mut emulator = RawReplEmulator::new(handler);
        device.set_responder(move |data| emulator.respond(data));
        device
    }

    pub fn transport(&self) -> Arc<MockTransport> {
        Arc::new(MockTransport {
            device: self.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_open(&self) -> bool {
        self.lock().to_host.is_some()
    }

    /// Emit bytes from the device. Returns false when no connection is open.
    pub fn push(&self, data: &[u8]) -> bool {
        match &self.lock().to_host {
            Some(sender) => sender.send(Ok(data.to_vec())).is_ok(),
            None => false,
        }
    }

    /// Everything the host has written, concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Each write call as received.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    pub fn set_responder(&self, responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static) {
        self.lock().responder = Some(Box::new(responder));
    }

    pub fn fail_open(&self, message: &str) {
        self.lock().open_error = Some(message.to_string());
    }

    pub fn fail_writes(&self, message: Option<&str>) {
        self.lock().write_error = message.map(str::to_string);
    }

    pub fn fail_close(&self, message: &str) {
        self.lock().close_error = Some(message.to_string());
    }

    /// Simulate the cable being pulled: the host sees a read error, then end of stream.
    pub fn unplug(&self) {
        if let Some(sender) = self.lock().to_host.take() {
            let _ = sender.send(Err(ReplComError::transport("device unplugged")));
        }
    }

    /// Close the device side cleanly.
    pub fn end_stream(&self) {
        self.lock().to_host.take();
    }

    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }
}

pub struct MockTransport {
    device: MockDevice,
}

#[async_trait]
impl Transport for MockTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Mock
    }

    async fn open(&self, settings: &SerialSettings) -> ReplComResult<Connection> {
        let mut state = self.device.lock();
        if let Some(message) = &state.open_error {
            return Err(ReplComError::OpenFailure {
                message: message.clone(),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state.to_host = Some(sender);
        state.connection_id += 1;
        state.opens += 1;
        let connection_id = state.connection_id;
        drop(state);

        debug!("Mock device opened on '{}'", settings.port);
        Ok(Connection {
            settings: settings.clone(),
            transport_type: TransportType::Mock,
            reader: Box::new(ChannelReader::new(receiver)),
            writer: Box::new(MockWriter {
                device: self.device.clone(),
                connection_id,
            }),
            closer: Box::new(MockCloser {
                device: self.device.clone(),
                connection_id,
            }),
        })
    }
}

struct MockWriter {
    device: MockDevice,
    connection_id: u64,
}

#[async_trait]
impl ByteWriter for MockWriter {
    async fn write_all(&mut self, data: &[u8]) -> ReplComResult<()> {
        let mut state = self.device.lock();
        if state.connection_id != self.connection_id || state.to_host.is_none() {
            return Err(ReplComError::transport("port is closed"));
        }
        if let Some(message) = &state.write_error {
            return Err(ReplComError::transport(message.clone()));
        }

        state.written.extend_from_slice(data);
        state.writes.push(data.to_vec());
        let reply = match state.responder.as_mut() {
            Some(responder) => responder(data),
            None => Vec::new(),
        };
        if !reply.is_empty() {
            if let Some(sender) = &state.to_host {
                let _ = sender.send(Ok(reply));
            }
        }
        Ok(())
    }
}

struct MockCloser {
    device: MockDevice,
    connection_id: u64,
}

#[async_trait]
impl Closer for MockCloser {
    async fn close(&self) -> ReplComResult<()> {
        let mut state = self.device.lock();
        if state.connection_id == self.connection_id {
            state.to_host = None;
        }
        state.closes += 1;
        match &state.close_error {
            Some(message) => Err(ReplComError::transport(message.clone())),
            None => Ok(()),
        }
    }
}

/// Byte-level imitation of a raw REPL.
///
/// Friendly mode echoes input. Raw mode buffers the program until 0x04, then
/// replies `OK`, the output, 0x04, the error text, 0x04 and the `>` prompt.
pub struct RawReplEmulator<F> {
    handler: F,
    raw: bool,
    program: Vec<u8>,
}

impl<F> RawReplEmulator<F>
where
    F: FnMut(&str) -> (String, String),
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            raw: false,
            program: Vec::new(),
        }
    }

    pub fn respond(&mut self, data: &[u8]) -> Vec<u8> {
        let mut reply = Vec::new();
        for &byte in data {
            match (self.raw, byte) {
                (_, ENTER_RAW) => {
                    self.raw = true;
                    self.program.clear();
                    reply.extend_from_slice(b"raw REPL; CTRL-B to exit\r\n>");
                }
                (true, EXECUTE) => {
                    let program = String::from_utf8_lossy(&self.program).into_owned();
                    self.program.clear();
                    let (output, error) = (self.handler)(&program);
                    reply.extend_from_slice(b"OK");
                    reply.extend_from_slice(output.as_bytes());
                    reply.push(EXECUTE);
                    reply.extend_from_slice(error.as_bytes());
                    reply.push(EXECUTE);
                    reply.push(b'>');
                }
                (true, EXIT_RAW) => {
                    self.raw = false;
                    reply.extend_from_slice(b"\r\nMicroPython v1.22.0 on mock\r\n>>> ");
                }
                (true, other) => self.program.push(other),
                (false, INTERRUPT) => reply.extend_from_slice(b"\r\nKeyboardInterrupt\r\n>>> "),
                (false, other) => reply.push(other),
            }
        }
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::communication::ByteReader;

    #[test]
    fn test_emulator_raw_round_trip() {
        let mut emulator = RawReplEmulator::new(|program: &str| {
            assert_eq!(program, "1+1\r");
            ("2\r\n".to_string(), String::new())
        });

        let reply = emulator.respond(b"\x011+1\r\x04\x02");
        let text = String::from_utf8(reply).unwrap();
        assert!(text.starts_with("raw REPL; CTRL-B to exit\r\n>OK2\r\n\u{4}\u{4}>"));
        assert!(text.ends_with(">>> "));
    }

    #[test]
    fn test_emulator_friendly_echo() {
        let mut emulator = RawReplEmulator::new(|_: &str| (String::new(), String::new()));
        assert_eq!(emulator.respond(b"ab"), b"ab".to_vec());
        assert_eq!(emulator.respond(&[INTERRUPT]), b"\r\nKeyboardInterrupt\r\n>>> ".to_vec());
    }

    #[tokio::test]
    async fn test_open_write_and_close() {
        let device = MockDevice::new();
        device.set_responder(|data| data.to_ascii_uppercase());
        let transport = device.transport();

        let mut connection = transport
            .open(&SerialSettings::new("mock0", 115_200))
            .await
            .unwrap();
        connection.writer.write_all(b"hi").await.unwrap();
        assert_eq!(connection.reader.read().await.unwrap(), Some(b"HI".to_vec()));
        assert_eq!(device.written(), b"hi".to_vec());

        connection.closer.close().await.unwrap();
        assert!(!device.is_open());
        assert_eq!(connection.reader.read().await.unwrap(), None);
        assert!(connection.writer.write_all(b"late").await.is_err());
        assert_eq!(device.close_count(), 1);
    }

    #[tokio::test]
    async fn test_open_failure() {
        let device = MockDevice::new();
        device.fail_open("no such port");
        let result = device
            .transport()
            .open(&SerialSettings::new("mock0", 115_200))
            .await;
        assert!(matches!(result, Err(ReplComError::OpenFailure { .. })));
        assert_eq!(device.open_count(), 0);
    }
}
