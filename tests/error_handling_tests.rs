use replcom::{ReplComError, ReplComResult};
use std::error::Error;

/// Error handling and resilience tests
#[cfg(test)]
mod error_handling_tests {
    use super::*;

    #[test]
    fn test_error_types() {
        let errors = vec![
            ReplComError::OpenFailure { message: "no such port".to_string() },
            ReplComError::transport("unplugged"),
            ReplComError::busy("exec"),
            ReplComError::WriterUnavailable,
            ReplComError::Config { message: "Config error".to_string() },
            ReplComError::Timeout { timeout_ms: 500 },
            ReplComError::InvalidState { state: "Closing".to_string() },
            ReplComError::InvalidInput("Invalid input".to_string()),
            ReplComError::Device("OSError: [Errno 2] ENOENT".to_string()),
            ReplComError::Output("Output error".to_string()),
        ];

        for error in errors {
            let display = error.to_string();
            assert!(!display.is_empty(), "Error display should not be empty");
        }

        // All errors should be Send + Sync for async compatibility
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ReplComError>();
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let error: ReplComError = io_error.into();
        assert!(matches!(error, ReplComError::Io(_)));
        assert!(error.source().is_some());
        assert!(error.is_fatal_to_connection());
    }

    #[test]
    fn test_only_stream_failures_are_fatal() {
        assert!(ReplComError::transport("read failed").is_fatal_to_connection());
        assert!(!ReplComError::busy("connect").is_fatal_to_connection());
        assert!(!ReplComError::Timeout { timeout_ms: 10 }.is_fatal_to_connection());
        assert!(!ReplComError::Device("Traceback".to_string()).is_fatal_to_connection());
        assert!(!ReplComError::OpenFailure { message: "x".to_string() }.is_fatal_to_connection());
    }

    #[test]
    fn test_result_type() {
        fn success_function() -> ReplComResult<String> {
            Ok("success".to_string())
        }

        fn error_function() -> ReplComResult<String> {
            Err(ReplComError::Config {
                message: "Test error".to_string(),
            })
        }

        assert_eq!(success_function().unwrap(), "success");
        let error = error_function().unwrap_err();
        assert!(error.to_string().contains("Configuration error"));
        assert!(error.to_string().contains("Test error"));
    }

    #[test]
    fn test_error_formatting() {
        assert_eq!(
            ReplComError::Timeout { timeout_ms: 250 }.to_string(),
            "Operation timed out after 250ms"
        );
        assert_eq!(
            ReplComError::WriterUnavailable.to_string(),
            "Writer unavailable: no open connection"
        );
        assert!(ReplComError::Device("ZeroDivisionError".to_string())
            .to_string()
            .contains("ZeroDivisionError"));
    }

    #[tokio::test]
    async fn test_async_error_propagation() {
        async fn failing_async_function() -> ReplComResult<()> {
            Err(ReplComError::transport("Async operation failed"))
        }

        async fn calling_function() -> ReplComResult<()> {
            failing_async_function().await?;
            Ok(())
        }

        let error = calling_function().await.unwrap_err();
        assert!(error.to_string().contains("Transport"));
        assert!(error.to_string().contains("Async operation failed"));
    }

    #[test]
    fn test_error_size() {
        use std::mem;

        // Errors should not be too large (affects performance)
        let error_size = mem::size_of::<ReplComError>();
        assert!(error_size <= 128, "ReplComError too large: {} bytes", error_size);
    }

    #[test]
    fn test_anyhow_wraps_error() {
        let error: anyhow::Error = ReplComError::busy("write_file").into();
        assert!(error.downcast_ref::<ReplComError>().is_some());
        assert_eq!(error.to_string(), "Busy: write_file is already in progress");
    }
}
