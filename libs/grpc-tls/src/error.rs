//! Error types for client TLS configuration
//!
//! Every variant here surfaces to the probe as a connection failure: none of
//! them can be detected without touching the filesystem or the network.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while assembling or using client TLS credentials
#[derive(Error, Debug)]
pub enum TlsError {
    /// Failed to read certificate or key file from disk
    #[error("Failed to read certificate file '{path}': {source}")]
    CertificateReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// File was readable but did not contain the expected PEM section
    #[error("Failed to parse PEM certificate from '{path}': {reason}")]
    CertificateParseError { path: PathBuf, reason: String },

    /// The platform trust store could not be loaded or was empty
    #[error("Failed to load system trust roots: {reason}")]
    TrustStoreError { reason: String },

    /// Server name is not a valid DNS name or IP address
    #[error("Invalid TLS server name '{name}'")]
    InvalidServerName { name: String },

    /// rustls rejected the assembled configuration
    #[error("Invalid TLS configuration: {reason}")]
    InvalidConfig { reason: String },

    /// TCP dial or TLS handshake failed
    #[error("TLS handshake with {authority} failed: {source}")]
    HandshakeError {
        authority: String,
        source: std::io::Error,
    },
}

/// Result type alias for TLS operations
pub type TlsResult<T> = Result<T, TlsError>;

impl From<rustls::Error> for TlsError {
    fn from(err: rustls::Error) -> Self {
        TlsError::InvalidConfig {
            reason: err.to_string(),
        }
    }
}
