// Communication module - Byte stream abstractions, decoding and marker scanning
pub mod control;
pub mod decoder;
pub mod scanner;
pub mod transport;

pub use control::{ControlSequence, Marker};
pub use decoder::Utf8Decoder;
pub use scanner::{scan, CancelToken, ScanEnd, ScanOutcome, Scanner, StreamReader};
pub use transport::{ByteReader, ByteWriter, ChannelReader, Chunk, Closer, Connection, Transport, TransportType};
