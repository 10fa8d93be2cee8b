//! Exclusive claims on the two ends of a connection.
//!
//! A lease wraps the owned guard of the mutex protecting one end, so holding
//! the lease is holding the end. The [`LeaseBook`] mirrors every acquire and
//! release so the one-reader invariant can be checked from outside.

use crate::core::communication::{ByteWriter, StreamReader};
use crate::domain::error::{ReplComError, ReplComResult};
use serde::Serialize;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

const JOURNAL_CAPACITY: usize = 256;

/// Who holds the read end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LeaseHolder {
    Passthrough,
    Transaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LeaseEvent {
    ReadAcquired(LeaseHolder),
    ReadReleased(LeaseHolder),
    WriteAcquired,
    WriteReleased,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LeaseStats {
    pub active_reads: usize,
    pub peak_reads: usize,
    pub active_writes: usize,
    pub peak_writes: usize,
}

#[derive(Debug, Default)]
struct Ledger {
    stats: LeaseStats,
    journal: VecDeque<LeaseEvent>,
}

impl Ledger {
    fn record(&mut self, event: LeaseEvent) {
        match event {
            LeaseEvent::ReadAcquired(_) => {
                self.stats.active_reads += 1;
                self.stats.peak_reads = self.stats.peak_reads.max(self.stats.active_reads);
            }
            LeaseEvent::ReadReleased(_) => {
                self.stats.active_reads = self.stats.active_reads.saturating_sub(1);
            }
            LeaseEvent::WriteAcquired => {
                self.stats.active_writes += 1;
                self.stats.peak_writes = self.stats.peak_writes.max(self.stats.active_writes);
            }
            LeaseEvent::WriteReleased => {
                self.stats.active_writes = self.stats.active_writes.saturating_sub(1);
            }
        }
        if self.journal.len() == JOURNAL_CAPACITY {
            self.journal.pop_front();
        }
        self.journal.push_back(event);
    }
}

/// Shared record of lease activity for one session.
#[derive(Debug, Clone, Default)]
pub struct LeaseBook {
    ledger: Arc<StdMutex<Ledger>>,
}

impl LeaseBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: LeaseEvent) {
        trace!("Lease event: {:?}", event);
        self.ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .record(event);
    }

    pub fn stats(&self) -> LeaseStats {
        self.ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .stats
    }

    /// The most recent lease events, oldest first.
    pub fn journal(&self) -> Vec<LeaseEvent> {
        self.ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .journal
            .iter()
            .copied()
            .collect()
    }
}

/// The single active claim on the read end.
pub struct ReadLease {
    guard: OwnedMutexGuard<StreamReader>,
    holder: LeaseHolder,
    book: LeaseBook,
}

impl ReadLease {
    /// Claim the read end, failing with `Busy` if someone else holds it.
    pub fn try_acquire(
        reader: &Arc<Mutex<StreamReader>>,
        holder: LeaseHolder,
        book: &LeaseBook,
    ) -> ReplComResult<Self> {
        let guard = Arc::clone(reader)
            .try_lock_owned()
            .map_err(|_| ReplComError::busy("read lease"))?;
        book.record(LeaseEvent::ReadAcquired(holder));
        Ok(Self {
            guard,
            holder,
            book: book.clone(),
        })
    }

    pub fn holder(&self) -> LeaseHolder {
        self.holder
    }
}

impl Deref for ReadLease {
    type Target = StreamReader;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for ReadLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for ReadLease {
    fn drop(&mut self) {
        self.book.record(LeaseEvent::ReadReleased(self.holder));
    }
}

/// Claim on the write end, held for a single write.
pub struct WriteLease {
    guard: OwnedMutexGuard<Box<dyn ByteWriter>>,
    book: LeaseBook,
}

impl WriteLease {
    /// Wait for the write end. Waiters are served in FIFO order.
    pub async fn acquire(writer: &Arc<Mutex<Box<dyn ByteWriter>>>, book: &LeaseBook) -> Self {
        let guard = Arc::clone(writer).lock_owned().await;
        book.record(LeaseEvent::WriteAcquired);
        Self {
            guard,
            book: book.clone(),
        }
    }

    pub async fn write_all(&mut self, data: &[u8]) -> ReplComResult<()> {
        self.guard.write_all(data).await
    }
}

impl Drop for WriteLease {
    fn drop(&mut self) {
        self.book.record(LeaseEvent::WriteReleased);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::communication::ByteReader;
    use async_trait::async_trait;

    struct Empty;

    #[async_trait]
    impl ByteReader for Empty {
        async fn read(&mut self) -> ReplComResult<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    fn reader() -> Arc<Mutex<StreamReader>> {
        Arc::new(Mutex::new(StreamReader::new(Box::new(Empty))))
    }

    #[test]
    fn test_second_read_lease_is_busy() {
        let book = LeaseBook::new();
        let reader = reader();

        let first = ReadLease::try_acquire(&reader, LeaseHolder::Passthrough, &book).unwrap();
        let second = ReadLease::try_acquire(&reader, LeaseHolder::Transaction, &book);
        assert!(matches!(second, Err(ReplComError::Busy { .. })));
        assert_eq!(book.stats().active_reads, 1);

        drop(first);
        assert_eq!(book.stats().active_reads, 0);
        let third = ReadLease::try_acquire(&reader, LeaseHolder::Transaction, &book).unwrap();
        assert_eq!(third.holder(), LeaseHolder::Transaction);
        assert_eq!(book.stats().peak_reads, 1);
    }

    #[test]
    fn test_journal_order() {
        let book = LeaseBook::new();
        let reader = reader();

        drop(ReadLease::try_acquire(&reader, LeaseHolder::Passthrough, &book).unwrap());
        assert_eq!(
            book.journal(),
            vec![
                LeaseEvent::ReadAcquired(LeaseHolder::Passthrough),
                LeaseEvent::ReadReleased(LeaseHolder::Passthrough),
            ]
        );
    }

    #[test]
    fn test_journal_is_bounded() {
        let book = LeaseBook::new();
        for _ in 0..JOURNAL_CAPACITY {
            book.record(LeaseEvent::WriteAcquired);
            book.record(LeaseEvent::WriteReleased);
        }
        assert_eq!(book.journal().len(), JOURNAL_CAPACITY);
        assert_eq!(book.stats().peak_writes, 1);
    }
}
