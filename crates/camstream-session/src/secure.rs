use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use camstream_crypto::{KeyExchange, SessionCipher, PARTIAL_WINDOW};
use camstream_frame::packet::{KEY_EXCHANGE, MEDIA_DATA, TALK_START};
use camstream_frame::{CloseReason, Frame, FrameConfig, FrameHandler, FrameLink};
use camstream_transport::Endpoint;
use futures_util::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::attempt::SharedAttempt;
use crate::capability::CapabilityProbe;
use crate::error::{Result, SessionError};

/// Negotiation state of an [`EncryptionLayer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionState {
    Unnegotiated,
    /// Device does not require encryption; payloads pass through untouched.
    PlainConfirmed,
    /// Public key sent, wrapped session key not yet received.
    KeyExchangePending,
    /// Session key installed.
    Ready,
    Closed,
}

/// Encrypt an outbound payload the way the device expects for its type.
pub fn encrypt_outbound(cipher: &SessionCipher, packet_type: u32, payload: &[u8]) -> Vec<u8> {
    if packet_type == TALK_START {
        cipher.encrypt_some(payload)
    } else {
        cipher.encrypt_all(payload)
    }
}

/// Decrypt an inbound payload. Bulk data above 128 bytes is only partially
/// encrypted; everything else is fully encrypted.
pub fn decrypt_inbound(
    cipher: &SessionCipher,
    packet_type: u32,
    payload: &[u8],
) -> camstream_crypto::Result<Vec<u8>> {
    if packet_type == MEDIA_DATA && payload.len() > PARTIAL_WINDOW {
        cipher.decrypt_some(payload)
    } else {
        cipher.decrypt_all(payload)
    }
}

enum Phase {
    Unnegotiated,
    PlainConfirmed,
    KeyExchangePending {
        exchange: KeyExchange,
        waiter: oneshot::Sender<Result<()>>,
    },
    Ready(SessionCipher),
    Closed,
}

impl Phase {
    fn state(&self) -> EncryptionState {
        match self {
            Self::Unnegotiated => EncryptionState::Unnegotiated,
            Self::PlainConfirmed => EncryptionState::PlainConfirmed,
            Self::KeyExchangePending { .. } => EncryptionState::KeyExchangePending,
            Self::Ready(_) => EncryptionState::Ready,
            Self::Closed => EncryptionState::Closed,
        }
    }
}

/// Sits between the link's reader task and the session's handler.
///
/// Absorbs key-exchange frames and decrypts everything else before passing
/// it up.
struct CipherGate {
    phase: Mutex<Phase>,
    upstream: Arc<dyn FrameHandler>,
}

impl CipherGate {
    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn confirm_plain(&self) -> Result<()> {
        let mut phase = self.lock();
        if matches!(*phase, Phase::Closed) {
            return Err(SessionError::AlreadyClosed);
        }
        *phase = Phase::PlainConfirmed;
        Ok(())
    }

    fn begin_exchange(&self, exchange: KeyExchange) -> Result<oneshot::Receiver<Result<()>>> {
        let (tx, rx) = oneshot::channel();
        let mut phase = self.lock();
        if matches!(*phase, Phase::Closed) {
            return Err(SessionError::AlreadyClosed);
        }
        *phase = Phase::KeyExchangePending {
            exchange,
            waiter: tx,
        };
        Ok(rx)
    }

    fn outbound_cipher(&self) -> Result<Option<SessionCipher>> {
        match &*self.lock() {
            Phase::PlainConfirmed => Ok(None),
            Phase::Ready(cipher) => Ok(Some(cipher.clone())),
            Phase::Closed => Err(SessionError::AlreadyClosed),
            Phase::Unnegotiated | Phase::KeyExchangePending { .. } => {
                Err(SessionError::NotNegotiated)
            }
        }
    }

    fn absorb_key(&self, wrapped: &[u8]) {
        let mut phase = self.lock();
        let (exchange, waiter) = match mem::replace(&mut *phase, Phase::Unnegotiated) {
            Phase::KeyExchangePending { exchange, waiter } => (exchange, waiter),
            other => {
                *phase = other;
                debug!("ignoring key-exchange frame outside negotiation");
                return;
            }
        };

        match exchange.unwrap_session_key(wrapped) {
            Ok(cipher) => {
                *phase = Phase::Ready(cipher);
                drop(phase);
                info!("session key installed");
                let _ = waiter.send(Ok(()));
            }
            Err(err) => {
                drop(phase);
                warn!(%err, "rejected wrapped session key");
                let _ = waiter.send(Err(err.into()));
            }
        }
    }

    fn close(&self) {
        let previous = mem::replace(&mut *self.lock(), Phase::Closed);
        if let Phase::KeyExchangePending { waiter, .. } = previous {
            let _ = waiter.send(Err(SessionError::ConnectionClosed));
        }
    }

    // Fails a pending exchange but leaves a closed gate closed.
    fn abandon_exchange(&self) {
        let mut phase = self.lock();
        match mem::replace(&mut *phase, Phase::Unnegotiated) {
            Phase::KeyExchangePending { waiter, .. } => {
                let _ = waiter.send(Err(SessionError::ConnectionClosed));
            }
            other => *phase = other,
        }
    }
}

impl FrameHandler for CipherGate {
    fn on_frame(&self, frame: Frame) {
        if frame.packet_type == KEY_EXCHANGE {
            self.absorb_key(&frame.payload);
            return;
        }

        let cipher = match &*self.lock() {
            Phase::PlainConfirmed => None,
            Phase::Ready(cipher) => Some(cipher.clone()),
            _ => {
                warn!(
                    packet = frame.name(),
                    len = frame.payload.len(),
                    "dropping frame received before negotiation"
                );
                return;
            }
        };

        let frame = match cipher {
            None => frame,
            Some(cipher) => match decrypt_inbound(&cipher, frame.packet_type, &frame.payload) {
                Ok(plain) => Frame::new(frame.packet_type, plain),
                Err(err) => {
                    warn!(packet = frame.name(), %err, "dropping undecryptable frame");
                    return;
                }
            },
        };
        self.upstream.on_frame(frame);
    }

    fn on_close(&self, reason: &CloseReason) {
        self.abandon_exchange();
        self.upstream.on_close(reason);
    }
}

/// Encryption layer: negotiates with the device and transforms payloads.
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct EncryptionLayer {
    link: Arc<FrameLink>,
    gate: Arc<CipherGate>,
    probe: Arc<dyn CapabilityProbe>,
    attempt: Arc<SharedAttempt>,
}

impl EncryptionLayer {
    /// Create an unconnected layer delivering decrypted frames to `upstream`.
    pub fn new(
        endpoint: Endpoint,
        config: FrameConfig,
        probe: Arc<dyn CapabilityProbe>,
        upstream: Arc<dyn FrameHandler>,
    ) -> Self {
        let gate = Arc::new(CipherGate {
            phase: Mutex::new(Phase::Unnegotiated),
            upstream,
        });
        let link = Arc::new(FrameLink::new(
            endpoint,
            config,
            Arc::clone(&gate) as Arc<dyn FrameHandler>,
        ));
        Self {
            link,
            gate,
            probe,
            attempt: Arc::new(SharedAttempt::new()),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.link.endpoint()
    }

    /// Query capabilities, connect, and run the key exchange if required.
    ///
    /// Idempotent: concurrent callers share one attempt and a successful
    /// negotiation is never repeated. Does not resolve until the session key
    /// has been received and validated.
    pub async fn connect(&self) -> Result<()> {
        let link = Arc::clone(&self.link);
        let gate = Arc::clone(&self.gate);
        let probe = Arc::clone(&self.probe);
        self.attempt
            .run(move || negotiate(link, gate, probe).boxed())
            .await
    }

    /// Transform and send one frame.
    pub async fn send(&self, packet_type: u32, payload: Bytes) -> Result<()> {
        let payload = match self.gate.outbound_cipher()? {
            None => payload,
            Some(cipher) => Bytes::from(encrypt_outbound(&cipher, packet_type, &payload)),
        };
        self.link.send_frame(packet_type, payload).await?;
        Ok(())
    }

    /// Close the connection. Fails a pending key exchange with
    /// `ConnectionClosed`. Idempotent.
    pub async fn close(&self) {
        self.gate.close();
        self.link.close().await;
    }

    pub fn state(&self) -> EncryptionState {
        self.gate.lock().state()
    }

    /// True once a session key is installed.
    pub fn is_encrypted(&self) -> bool {
        self.state() == EncryptionState::Ready
    }

    pub fn is_closed(&self) -> bool {
        self.link.is_closed()
    }
}

impl std::fmt::Debug for EncryptionLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionLayer")
            .field("link", &self.link)
            .field("state", &self.state())
            .finish()
    }
}

async fn negotiate(
    link: Arc<FrameLink>,
    gate: Arc<CipherGate>,
    probe: Arc<dyn CapabilityProbe>,
) -> Result<()> {
    if link.is_closed() {
        return Err(SessionError::AlreadyClosed);
    }
    let caps = probe.query(link.endpoint()).await?;

    if !caps.encryption_required() {
        gate.confirm_plain()?;
        link.connect().await?;
        debug!(endpoint = %link.endpoint(), "device does not require encryption");
        return Ok(());
    }

    let exchange = KeyExchange::generate()?;
    let public_key = exchange.public_key_payload();
    link.connect().await?;

    // The waiter is armed before the key goes out so the reply cannot race it.
    let key = gate.begin_exchange(exchange)?;
    link.send_frame(KEY_EXCHANGE, public_key).await?;
    debug!(endpoint = %link.endpoint(), "public key sent, awaiting session key");

    key.await.unwrap_or(Err(SessionError::ConnectionClosed))
}
