use bytes::Bytes;

use crate::error::SessionError;

/// Unsolicited notifications published by a session.
///
/// Delivered in arrival order to every subscriber. A subscriber that falls
/// more than the configured capacity behind skips ahead. Media payloads
/// travel on their own channel, see [`Session::subscribe_media`](crate::Session::subscribe_media).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Motion-detection event, raw payload bytes.
    Motion(Bytes),
    /// A background keepalive failed. The loop keeps running.
    KeepAliveFailed(SessionError),
    /// The connection ended. Published once.
    Closed,
}
