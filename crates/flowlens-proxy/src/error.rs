//! Error types for the proxy lifecycle.

use thiserror::Error;

/// Proxy lifecycle error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// CA certificate error.
    #[error("CA error: {0}")]
    Ca(#[from] CaError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine failed to build or launch.
    #[error("engine error: {0}")]
    Engine(String),
}

/// CA manager error type.
#[derive(Debug, Error)]
pub enum CaError {
    /// Failed to generate the CA certificate.
    #[error("failed to generate CA: {0}")]
    Generation(String),

    /// Failed to read the CA certificate.
    #[error("failed to read CA: {0}")]
    Read(#[from] std::io::Error),

    /// Failed to parse the CA certificate.
    #[error("failed to parse CA: {0}")]
    Parse(String),

    /// Failed to write the CA certificate.
    #[error("failed to write CA: {0}")]
    Write(String),
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
