use bytes::Bytes;
use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tracing::trace;

use crate::codec::{Frame, FrameCodec, FrameConfig};
use crate::error::{FrameError, Result};
use crate::packet::packet_name;

/// Writes complete frames to an async stream.
///
/// A single lock serializes writers so one frame's header is never
/// interleaved with another frame's payload. Each frame is encoded into one
/// contiguous buffer before it is written.
pub struct FrameWriter<W> {
    inner: Mutex<Option<FramedWrite<W, FrameCodec>>>,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Create a frame writer with explicit configuration.
    pub fn new(inner: W, config: FrameConfig) -> Self {
        Self {
            inner: Mutex::new(Some(FramedWrite::new(
                inner,
                FrameCodec::with_config(config),
            ))),
        }
    }

    /// Encode and send a payload with the given packet type.
    pub async fn send(&self, packet_type: u32, payload: Bytes) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let sink = guard.as_mut().ok_or(FrameError::ConnectionClosed)?;
        trace!(
            packet = packet_name(packet_type),
            len = payload.len(),
            "frame sent"
        );
        sink.send(Frame::new(packet_type, payload)).await
    }

    /// Flush pending bytes and shut the write half down.
    ///
    /// Subsequent sends fail with [`FrameError::ConnectionClosed`].
    pub async fn shutdown(&self) {
        if let Some(mut sink) = self.inner.lock().await.take() {
            let _ = sink.close().await;
        }
    }
}
