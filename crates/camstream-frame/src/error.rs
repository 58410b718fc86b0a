/// Errors that can occur during frame encoding/decoding and link operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A header with a valid magic declared a length that can never be satisfied.
    #[error("malformed frame: declared payload length {declared} exceeds max {max}")]
    Malformed { declared: usize, max: usize },

    /// Transport-level error while establishing the connection.
    #[error("transport error: {0}")]
    Transport(#[from] camstream_transport::TransportError),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A send was attempted before the link was connected.
    #[error("link not connected")]
    NotConnected,

    /// The link was explicitly closed.
    #[error("link already closed")]
    AlreadyClosed,

    /// The connection was closed by the remote end.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
