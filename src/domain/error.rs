use thiserror::Error;

/// ReplCom unified error type
#[derive(Error, Debug)]
pub enum ReplComError {
    /// The transport could not be opened. The session stays disconnected.
    #[error("Failed to open connection: {message}")]
    OpenFailure { message: String },

    /// A read or write failed while the connection was in use.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// An incompatible operation is already in flight.
    #[error("Busy: {operation} is already in progress")]
    Busy { operation: String },

    /// A write was attempted without an open connection.
    #[error("Writer unavailable: no open connection")]
    WriterUnavailable,

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Operation not allowed in state {state}")]
    InvalidState { state: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The device executed the request and reported an error of its own.
    #[error("Device reported an error: {0}")]
    Device(String),

    #[error("Output error: {0}")]
    Output(String),
}

impl ReplComError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn busy(operation: impl Into<String>) -> Self {
        Self::Busy {
            operation: operation.into(),
        }
    }

    /// Whether the error means the underlying stream can no longer be trusted.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Serial(_) | Self::Io(_)
        )
    }
}

pub type ReplComResult<T> = Result<T, ReplComError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ReplComError::transport("unplugged").is_fatal_to_connection());
        assert!(!ReplComError::busy("transaction").is_fatal_to_connection());
        assert!(!ReplComError::WriterUnavailable.is_fatal_to_connection());
        assert!(!ReplComError::Device("Traceback".to_string()).is_fatal_to_connection());
    }

    #[test]
    fn test_busy_display() {
        let error = ReplComError::busy("write_file");
        assert_eq!(error.to_string(), "Busy: write_file is already in progress");
    }
}
