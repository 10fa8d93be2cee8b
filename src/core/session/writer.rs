use crate::core::communication::ByteWriter;
use crate::core::session::lease::{LeaseBook, WriteLease};
use crate::domain::error::ReplComResult;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Single entry point for writes to the device.
///
/// Concurrent senders queue on the write end in arrival order, so bytes from
/// two callers are never interleaved. The lease is dropped before `send`
/// returns, whether or not the write succeeded.
#[derive(Clone)]
pub struct WriterGate {
    writer: Arc<Mutex<Box<dyn ByteWriter>>>,
    book: LeaseBook,
}

impl WriterGate {
    pub fn new(writer: Box<dyn ByteWriter>, book: LeaseBook) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            book,
        }
    }

    pub async fn send(&self, data: &[u8]) -> ReplComResult<()> {
        let mut lease = WriteLease::acquire(&self.writer, &self.book).await;
        let result = lease.write_all(data).await;
        drop(lease);

        match &result {
            Ok(()) => debug!("Sent {} bytes", data.len()),
            Err(e) => error!("Failed to write {} bytes: {}", data.len(), e),
        }
        result
    }
}
