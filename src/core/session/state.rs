use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// Session state enumeration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No connection is open
    #[default]
    Disconnected,
    /// The transport is being opened
    Connecting,
    /// Connected, device output is forwarded to observers
    Streaming,
    /// A command transaction owns the stream
    Executing,
    /// The connection is being torn down
    Closing,
}

impl SessionState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Streaming)
                | (Connecting, Disconnected)
                | (Streaming, Executing)
                | (Executing, Streaming)
                | (Streaming, Closing)
                | (Executing, Closing)
                | (Streaming, Disconnected)
                | (Executing, Disconnected)
                | (Closing, Disconnected)
        )
    }

    /// Whether a connection is open and usable.
    pub fn is_connected(self) -> bool {
        matches!(self, SessionState::Streaming | SessionState::Executing)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Streaming => write!(f, "Streaming"),
            SessionState::Executing => write!(f, "Executing"),
            SessionState::Closing => write!(f, "Closing"),
        }
    }
}

/// Session statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatistics {
    /// Total bytes written to the device
    pub bytes_sent: u64,
    /// Total bytes of decoded text delivered from the device
    pub bytes_received: u64,
    /// Transactions that completed
    pub transactions: u64,
    /// Transactions that returned an error
    pub failed_transactions: u64,
    /// Number of errors
    pub error_count: u64,
    /// Time since the current connection was opened
    pub uptime: Option<Duration>,
}

/// Lock-free counters behind [`SessionStatistics`].
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    transactions: AtomicU64,
    failed_transactions: AtomicU64,
    error_count: AtomicU64,
}

impl SessionCounters {
    pub fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_transaction(&self, succeeded: bool) {
        if succeeded {
            self.transactions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_transactions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, connected_at: Option<SystemTime>) -> SessionStatistics {
        SessionStatistics {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            transactions: self.transactions.load(Ordering::Relaxed),
            failed_transactions: self.failed_transactions.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            uptime: connected_at
                .and_then(|at| SystemTime::now().duration_since(at).ok()),
        }
    }
}
