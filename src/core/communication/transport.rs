use crate::domain::{config::SerialSettings, error::ReplComResult};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Transport type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    Serial,
    Mock,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Serial => write!(f, "serial"),
            TransportType::Mock => write!(f, "mock"),
        }
    }
}

/// Something that can open a duplex byte stream to a device.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get the transport type
    fn transport_type(&self) -> TransportType;

    /// Open a connection with the given link settings
    async fn open(&self, settings: &SerialSettings) -> ReplComResult<Connection>;
}

/// Read end of a duplex stream.
///
/// `read` must be cancel safe: dropping a pending call may not lose bytes.
#[async_trait]
pub trait ByteReader: Send {
    /// Pull the next chunk. `Ok(None)` signals end of stream.
    async fn read(&mut self) -> ReplComResult<Option<Vec<u8>>>;
}

/// Write end of a duplex stream.
#[async_trait]
pub trait ByteWriter: Send {
    /// Write the whole buffer before returning.
    async fn write_all(&mut self, data: &[u8]) -> ReplComResult<()>;
}

/// Releases whatever the transport holds open for a connection.
#[async_trait]
pub trait Closer: Send + Sync {
    async fn close(&self) -> ReplComResult<()>;
}

/// An open duplex stream split into its two ends.
pub struct Connection {
    pub settings: SerialSettings,
    pub transport_type: TransportType,
    pub reader: Box<dyn ByteReader>,
    pub writer: Box<dyn ByteWriter>,
    pub closer: Box<dyn Closer>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("settings", &self.settings)
            .field("transport_type", &self.transport_type)
            .finish_non_exhaustive()
    }
}

/// Chunk produced by a transport's receive side.
pub type Chunk = ReplComResult<Vec<u8>>;

/// Read end fed by a channel. Receiving is cancel safe, so a scan can be
/// interrupted between chunks without dropping data.
pub struct ChannelReader {
    receiver: mpsc::UnboundedReceiver<Chunk>,
}

impl ChannelReader {
    pub fn new(receiver: mpsc::UnboundedReceiver<Chunk>) -> Self {
        Self { receiver }
    }
}

#[async_trait]
impl ByteReader for ChannelReader {
    async fn read(&mut self) -> ReplComResult<Option<Vec<u8>>> {
        match self.receiver.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}
