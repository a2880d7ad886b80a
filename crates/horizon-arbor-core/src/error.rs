//! Error types for Horizon Arbor core systems.

/// Signal-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    /// The connection ID is invalid or has already been disconnected.
    #[error("Invalid or disconnected connection ID")]
    InvalidConnection,
}

/// Delayed-task errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    /// No tokio runtime is running on the current thread.
    #[error("No async runtime available to run the delayed task")]
    NoRuntime,
}

/// A specialized Result type for core operations.
pub type Result<T> = std::result::Result<T, TimerError>;
