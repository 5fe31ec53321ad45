use thiserror::Error;

/// Monitor error types covering configuration, hardware, storage and delivery failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PulseError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Digital input or output could not be read or driven.
    #[error("hardware error: {0}")]
    Hardware(String),

    /// I/O operation error (timestamp log, sysfs files).
    #[error("I/O error: {0}")]
    IoError(String),

    /// Notification sink rejected or failed to deliver a message.
    #[error("notification failed: {0}")]
    Notification(String),

    /// A background loop could not be started.
    #[error("failed to spawn {component} thread: {reason}")]
    Spawn {
        /// Loop name.
        component: String,
        /// Underlying failure.
        reason: String,
    },

    /// A background loop panicked before it could be joined.
    #[error("{0} thread panicked")]
    Panicked(String),
}

/// Convenience type alias for monitor operations.
pub type PulseResult<T> = Result<T, PulseError>;
