use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::{Frame, FrameCodec};

/// Upward hook invoked by the link's reader task.
///
/// Implementations run on the single reader task and must never block:
/// complete a waiter, push into a channel, and return.
pub trait FrameHandler: Send + Sync + 'static {
    /// Called once per fully reassembled frame, in arrival order.
    fn on_frame(&self, frame: Frame);

    /// Called when the link stops delivering frames.
    fn on_close(&self, reason: &CloseReason) {
        let _ = reason;
    }
}

/// Why a link stopped delivering frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called locally.
    Local,
    /// The device closed the stream.
    Eof,
    /// A socket error or malformed frame ended the stream.
    Error(String),
}

/// Drive reassembly and dispatch until EOF, error or cancellation.
pub async fn read_loop<R>(
    mut frames: FramedRead<R, FrameCodec>,
    handler: Arc<dyn FrameHandler>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break CloseReason::Local,
            next = frames.next() => match next {
                Some(Ok(frame)) => {
                    trace!(packet = frame.name(), len = frame.payload.len(), "frame received");
                    handler.on_frame(frame);
                }
                Some(Err(err)) => {
                    warn!(%err, "frame reader stopped");
                    break CloseReason::Error(err.to_string());
                }
                None => {
                    debug!("device closed the stream");
                    break CloseReason::Eof;
                }
            }
        }
    };

    // A local close notifies the handler itself.
    if reason != CloseReason::Local {
        handler.on_close(&reason);
    }
}
