use thiserror::Error;

/// Main error type for the transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// URL scheme not handled by the requested transfer kind
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// Host name resolution failed
    #[error("Failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    /// TCP connection could not be established
    #[error("Connection failed: {0}")]
    Connect(String),

    /// TLS setup or handshake failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// Socket I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed HTTP response
    #[error("HTTP protocol error: {0}")]
    Http(String),

    /// WebSocket upgrade rejected or malformed
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    /// WebSocket framing violation
    #[error("WebSocket protocol error: {0}")]
    WebSocket(String),

    /// Peer closed the connection
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Transfer exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Body sink accepted fewer bytes than it was given
    #[error("Write callback rejected {rejected} bytes")]
    WriteRejected { rejected: usize },

    /// Redirect chain longer than allowed
    #[error("Too many redirects (limit {0})")]
    TooManyRedirects(usize),

    /// WebSocket send attempted before the handshake completed
    #[error("WebSocket is not connected")]
    NotConnected,

    /// JSON serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;
