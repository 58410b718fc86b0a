use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use camstream_transport::Endpoint;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::OnceCell;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::codec::{FrameCodec, FrameConfig};
use crate::error::{FrameError, Result};
use crate::reader::{read_loop, CloseReason, FrameHandler};
use crate::writer::FrameWriter;

/// The framing layer: owns the TCP connection to one device.
///
/// One reader task reassembles inbound bytes and hands every frame to the
/// [`FrameHandler`] supplied at construction. Outbound frames go through a
/// single write lock.
pub struct FrameLink {
    endpoint: Endpoint,
    config: FrameConfig,
    handler: Arc<dyn FrameHandler>,
    writer: OnceCell<FrameWriter<OwnedWriteHalf>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl FrameLink {
    /// Create an unconnected link.
    pub fn new(endpoint: Endpoint, config: FrameConfig, handler: Arc<dyn FrameHandler>) -> Self {
        Self {
            endpoint,
            config,
            handler,
            writer: OnceCell::new(),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Device this link talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Open the connection, send the preamble and start the reader task.
    ///
    /// Idempotent: callers arriving while an attempt is in flight wait for
    /// it, and once connected every call returns immediately.
    pub async fn connect(&self) -> Result<()> {
        if self.is_closed() {
            return Err(FrameError::AlreadyClosed);
        }
        let writer = self.writer.get_or_try_init(|| self.open()).await?;
        if self.is_closed() {
            // `close` ran while the socket was opening and found no writer.
            writer.shutdown().await;
            return Err(FrameError::AlreadyClosed);
        }
        Ok(())
    }

    async fn open(&self) -> Result<FrameWriter<OwnedWriteHalf>> {
        let stream = camstream_transport::connect(&self.endpoint).await?;
        let (read_half, write_half) = stream.into_split();

        let frames = FramedRead::new(read_half, FrameCodec::with_config(self.config.clone()));
        tokio::spawn(read_loop(
            frames,
            Arc::clone(&self.handler),
            self.cancel.clone(),
        ));

        info!(endpoint = %self.endpoint, "link connected");
        Ok(FrameWriter::new(write_half, self.config.clone()))
    }

    /// Serialize and write one frame. No acknowledgment is implied.
    pub async fn send_frame(&self, packet_type: u32, payload: impl Into<Bytes>) -> Result<()> {
        if self.is_closed() {
            return Err(FrameError::AlreadyClosed);
        }
        let writer = self.writer.get().ok_or(FrameError::NotConnected)?;
        writer.send(packet_type, payload.into()).await
    }

    /// Mark the link closed, stop the reader and shut the socket down.
    ///
    /// Idempotent. Any later `connect` or `send_frame` fails with
    /// [`FrameError::AlreadyClosed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        if let Some(writer) = self.writer.get() {
            writer.shutdown().await;
        }
        self.handler.on_close(&CloseReason::Local);
        info!(endpoint = %self.endpoint, "link closed");
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// True once a connection attempt has succeeded.
    pub fn is_connected(&self) -> bool {
        self.writer.initialized() && !self.is_closed()
    }
}

impl Drop for FrameLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for FrameLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLink")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .finish()
    }
}
