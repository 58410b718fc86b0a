use std::time::Duration;

use camstream_crypto::CryptoError;
use camstream_frame::FrameError;

use crate::stream::StreamKind;

/// Errors surfaced by the encryption and session layers.
///
/// `Clone` so that one shared connection attempt can hand the same outcome
/// to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Socket-level failure while connecting, reading or writing.
    #[error("connection error: {0}")]
    Connection(String),

    /// The session was explicitly closed.
    #[error("session already closed")]
    AlreadyClosed,

    /// The control-channel capability query failed or returned garbage.
    #[error("capability query failed: {0}")]
    CapabilityQueryFailed(String),

    /// The unwrapped session key did not start with its zero field.
    #[error("wrapped key has bad padding")]
    BadKeyPadding,

    /// The unwrapped session key declared more bytes than it carries.
    #[error("wrapped key too short (declared {declared} bytes, {available} available)")]
    KeyTooShort { declared: usize, available: usize },

    #[error("login rejected by device (code {code})")]
    LoginRejected { code: u32 },

    #[error("keepalive rejected by device (code {code})")]
    KeepAliveRejected { code: u32 },

    /// A background keepalive got no answer within one period.
    #[error("keepalive not answered within {0:?}")]
    KeepAliveTimeout(Duration),

    #[error("stream request rejected by device (code {code})")]
    StreamRejected { code: u32 },

    /// The connection ended while the operation was waiting for a reply.
    #[error("connection closed")]
    ConnectionClosed,

    /// A frame or reply could not be interpreted.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Any other key-exchange or cipher failure.
    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    /// A frame was sent before encryption was negotiated.
    #[error("encryption not negotiated")]
    NotNegotiated,

    /// A start or stop for this stream is already in flight.
    #[error("{0} stream request already in flight")]
    StreamBusy(StreamKind),

    /// Compression was requested but no audio codec is configured.
    #[error("no audio codec configured")]
    CodecUnavailable,

    #[error("audio codec error: {0}")]
    Codec(String),
}

impl From<FrameError> for SessionError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::AlreadyClosed => Self::AlreadyClosed,
            FrameError::ConnectionClosed => Self::ConnectionClosed,
            FrameError::Malformed { .. } | FrameError::PayloadTooLarge { .. } => {
                Self::MalformedFrame(err.to_string())
            }
            other => Self::Connection(other.to_string()),
        }
    }
}

impl From<CryptoError> for SessionError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::BadKeyPadding => Self::BadKeyPadding,
            CryptoError::KeyTooShort {
                declared,
                available,
            } => Self::KeyTooShort {
                declared,
                available,
            },
            other => Self::Crypto(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
