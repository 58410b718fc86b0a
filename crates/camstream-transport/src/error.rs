/// Errors raised while opening the device connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The TCP connect to the device failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Writing the preamble or configuring the socket failed.
    #[error("preamble write failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
