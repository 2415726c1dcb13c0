//! Error types for cachewatch

/// Result type alias for cachewatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cachewatch
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP client errors (registry and peer polls)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
    /// Registry rejected an assignment update
    #[error("Registry conflict: unexpected status {status}")]
    Registry { status: u16 },
    /// This monitor is missing from the polled topology
    #[error("Monitor '{0}' not present in topology")]
    MonitorNotInTopology(String),
    /// No coordinate could be resolved for this monitor
    #[error("Monitor '{0}' has no resolvable coordinate")]
    MonitorWithoutCoordinate(String),
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
