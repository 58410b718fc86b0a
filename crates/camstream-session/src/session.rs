use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use camstream_frame::packet::{
    LOGIN, LOGIN_REPLY, TALK_DATA, TALK_START, TALK_START_REPLY, TALK_STOP, TALK_STOP_REPLY,
    VIDEO_START, VIDEO_START_REPLY, VIDEO_STOP, VIDEO_STOP_REPLY,
};
use camstream_frame::{CloseReason, FrameHandler};
use camstream_transport::Endpoint;
use futures_util::FutureExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attempt::SharedAttempt;
use crate::audio::AudioCodec;
use crate::capability::{CapabilityProbe, HttpCapabilityProbe};
use crate::config::SessionConfig;
use crate::dispatch::{Dispatcher, SessionState};
use crate::error::{Result, SessionError};
use crate::event::SessionEvent;
use crate::keepalive;
use crate::messages::{self, result_code, Credentials};
use crate::secure::{EncryptionLayer, EncryptionState};
use crate::stream::{StreamKind, StreamState};

/// Sends a request and waits for the reply of its paired type.
#[derive(Clone)]
pub(crate) struct Requester {
    layer: EncryptionLayer,
    dispatcher: Arc<Dispatcher>,
}

impl Requester {
    /// Returns the reply's result code. The waiter is registered before the
    /// request is written.
    pub(crate) async fn request(
        &self,
        request_type: u32,
        payload: Bytes,
        reply_type: u32,
    ) -> Result<u32> {
        let waiter = self.dispatcher.pending.register(reply_type);
        self.layer.send(request_type, payload).await?;
        let reply = waiter.wait().await?;
        result_code(&reply)
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        self.dispatcher.publish(event);
    }
}

/// A client session with one camera device.
///
/// Cheap to clone; clones share the connection. Dropping the last handle
/// stops the keepalive and reader tasks.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    credentials: Credentials,
    requester: Requester,
    attempt: SharedAttempt,
    codec: Option<Arc<dyn AudioCodec>>,
    keepalive: CancellationToken,
    closed: AtomicBool,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.keepalive.cancel();
    }
}

impl Session {
    /// Session that asks the device over HTTP whether to encrypt.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_parts(config, Arc::new(HttpCapabilityProbe::new()), None)
    }

    /// Session with an explicit capability probe and optional audio codec.
    pub fn with_parts(
        config: SessionConfig,
        probe: Arc<dyn CapabilityProbe>,
        codec: Option<Arc<dyn AudioCodec>>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(config.event_capacity, config.media_capacity));
        let layer = EncryptionLayer::new(
            config.endpoint(),
            config.frame_config(),
            probe,
            Arc::clone(&dispatcher) as Arc<dyn FrameHandler>,
        );
        let credentials = Credentials {
            username: config.username.clone(),
            password: config.password.clone(),
            group_id: rand::random(),
        };
        let keepalive = dispatcher.shutdown_token().child_token();
        debug!(endpoint = %layer.endpoint(), group_id = credentials.group_id, "session created");

        Self {
            inner: Arc::new(SessionInner {
                config,
                credentials,
                requester: Requester { layer, dispatcher },
                attempt: SharedAttempt::new(),
                codec,
                keepalive,
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn layer(&self) -> &EncryptionLayer {
        &self.inner.requester.layer
    }

    fn dispatcher(&self) -> &Dispatcher {
        &self.inner.requester.dispatcher
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SessionError::AlreadyClosed);
        }
        if self.dispatcher().is_closed() {
            return Err(SessionError::ConnectionClosed);
        }
        Ok(())
    }

    /// Negotiate encryption, log in and start the keepalive.
    ///
    /// Idempotent: concurrent callers share one attempt, and once logged in
    /// every call returns immediately. A failed attempt can be retried.
    pub async fn connect(&self) -> Result<()> {
        self.ensure_open()?;
        if self.inner.attempt.succeeded() {
            return Ok(());
        }
        let requester = self.inner.requester.clone();
        let main_stream = self.inner.config.main_stream;
        let login = messages::stream_request(&self.inner.credentials, main_stream);
        let group_id = self.inner.credentials.group_id;
        let period = self.inner.config.keepalive_interval();
        let keepalive = self.inner.keepalive.clone();
        self.inner
            .attempt
            .run(move || establish(requester, login, group_id, period, keepalive).boxed())
            .await
    }

    /// Send one keepalive now and wait for the device's answer.
    pub async fn keepalive(&self) -> Result<()> {
        self.connect().await?;
        keepalive::keepalive_once(&self.inner.requester, self.inner.credentials.group_id).await
    }

    /// Ask the device to start streaming video from the main or sub stream.
    pub async fn start_video_stream(&self, main_stream: bool) -> Result<()> {
        self.connect().await?;
        let Some(transition) = self
            .dispatcher()
            .streams
            .begin_start(StreamKind::Video, main_stream)?
        else {
            return Ok(());
        };
        let payload = messages::stream_request(&self.inner.credentials, transition.main_stream());
        let result = self.control(VIDEO_START, payload, VIDEO_START_REPLY).await;
        transition.finish(result.is_ok());
        if result.is_ok() {
            info!(main_stream, "video stream started");
        }
        result
    }

    /// Stop the video stream started with [`start_video_stream`](Self::start_video_stream).
    pub async fn stop_video_stream(&self) -> Result<()> {
        self.connect().await?;
        let Some(transition) = self.dispatcher().streams.begin_stop(StreamKind::Video)? else {
            return Ok(());
        };
        let payload = messages::stream_request(&self.inner.credentials, transition.main_stream());
        let result = self.control(VIDEO_STOP, payload, VIDEO_STOP_REPLY).await;
        transition.finish(result.is_ok());
        if result.is_ok() {
            info!("video stream stopped");
        }
        result
    }

    /// Open the talk-back channel.
    pub async fn start_talk_stream(&self) -> Result<()> {
        self.connect().await?;
        let Some(transition) = self.dispatcher().streams.begin_start(StreamKind::Talk, false)? else {
            return Ok(());
        };
        let payload = messages::talk_request(&self.inner.credentials);
        let result = self.control(TALK_START, payload, TALK_START_REPLY).await;
        transition.finish(result.is_ok());
        if result.is_ok() {
            info!("talk stream started");
        }
        result
    }

    /// Close the talk-back channel.
    pub async fn stop_talk_stream(&self) -> Result<()> {
        self.connect().await?;
        let Some(transition) = self.dispatcher().streams.begin_stop(StreamKind::Talk)? else {
            return Ok(());
        };
        let payload = messages::talk_request(&self.inner.credentials);
        let result = self.control(TALK_STOP, payload, TALK_STOP_REPLY).await;
        transition.finish(result.is_ok());
        if result.is_ok() {
            info!("talk stream stopped");
        }
        result
    }

    /// Send talk-back audio. With `compress`, `samples` is raw PCM and is
    /// run through the configured codec first; otherwise it is sent as is.
    /// No reply is awaited.
    pub async fn send_talk_data(&self, samples: &[u8], compress: bool) -> Result<()> {
        let audio = if compress {
            let codec = self
                .inner
                .codec
                .as_ref()
                .ok_or(SessionError::CodecUnavailable)?;
            codec
                .encode(samples)
                .map_err(|e| SessionError::Codec(e.to_string()))?
        } else {
            samples.to_vec()
        };
        self.connect().await?;
        self.layer().send(TALK_DATA, messages::talk_data(&audio)).await
    }

    async fn control(&self, request_type: u32, payload: Bytes, reply_type: u32) -> Result<()> {
        let code = self
            .inner
            .requester
            .request(request_type, payload, reply_type)
            .await?;
        if code != 0 {
            warn!(code, reply_type, "stream request rejected");
            return Err(SessionError::StreamRejected { code });
        }
        Ok(())
    }

    /// Receive motion events, keepalive failures and the close notification.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.dispatcher().subscribe()
    }

    /// Receive decrypted `MEDIA_DATA` payloads of the started streams.
    ///
    /// A subscriber that falls behind gets `Lagged` here without affecting
    /// [`subscribe`](Self::subscribe).
    pub fn subscribe_media(&self) -> broadcast::Receiver<Bytes> {
        self.dispatcher().subscribe_media()
    }

    /// Close the connection and fail everything still waiting with
    /// `ConnectionClosed`. Idempotent; later operations fail with
    /// `AlreadyClosed`.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.keepalive.cancel();
        self.dispatcher().shut_down(&CloseReason::Local);
        self.layer().close().await;
    }

    pub fn state(&self) -> SessionState {
        self.dispatcher().state()
    }

    pub fn stream_state(&self, kind: StreamKind) -> StreamState {
        self.dispatcher().streams.state(kind)
    }

    /// Random identifier echoed in every credentialed request.
    pub fn group_id(&self) -> u32 {
        self.inner.credentials.group_id
    }

    /// True once a session key has been negotiated.
    pub fn is_encrypted(&self) -> bool {
        self.layer().is_encrypted()
    }

    pub fn encryption_state(&self) -> EncryptionState {
        self.layer().state()
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.layer().endpoint()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", self.endpoint())
            .field("state", &self.state())
            .field("encryption", &self.encryption_state())
            .field("group_id", &self.group_id())
            .finish()
    }
}

async fn establish(
    requester: Requester,
    login: Bytes,
    group_id: u32,
    keepalive_period: Duration,
    keepalive: CancellationToken,
) -> Result<()> {
    let dispatcher = Arc::clone(&requester.dispatcher);
    dispatcher.transition(SessionState::Connecting);

    let outcome = async {
        requester.layer.connect().await?;
        dispatcher.transition(SessionState::LoggingIn);
        let code = requester.request(LOGIN, login, LOGIN_REPLY).await?;
        if code != 0 {
            return Err(SessionError::LoginRejected { code });
        }
        Ok(())
    }
    .await;

    if let Err(err) = outcome {
        warn!(%err, "session connect failed");
        dispatcher.transition(SessionState::Disconnected);
        return Err(err);
    }

    dispatcher.transition(SessionState::LoggedIn);
    info!(
        endpoint = %requester.layer.endpoint(),
        encrypted = requester.layer.is_encrypted(),
        "logged in"
    );
    if keepalive_period.is_zero() {
        debug!("keepalive disabled");
    } else {
        keepalive::spawn(requester, group_id, keepalive_period, keepalive);
    }
    Ok(())
}
