//! MITM error types

use thiserror::Error;

/// Result type for MITM operations
pub type Result<T> = std::result::Result<T, MitmError>;

/// Errors while reading the client's first TLS record
#[derive(Error, Debug)]
pub enum ClientHelloError {
    /// Client closed the tunnel before sending anything
    #[error("Client closed connection before sending data")]
    Closed,

    /// Not a TLS handshake record
    #[error("Not a TLS handshake record")]
    NotTls,

    /// Record or handshake shorter than its declared length
    #[error("Truncated ClientHello")]
    Incomplete,

    /// First record declares more than a TLS record may carry
    #[error("TLS record too large: {0} bytes")]
    RecordTooLarge(usize),

    /// rustls refused the ClientHello
    #[error("Invalid ClientHello: {0}")]
    Rejected(#[source] rustls::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// MITM-specific errors
#[derive(Error, Debug)]
pub enum MitmError {
    #[error(transparent)]
    ClientHello(#[from] ClientHelloError),

    /// Could not reach the CONNECT target
    #[error("Failed to connect to upstream {host}: {source}")]
    UpstreamConnect {
        host: String,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
