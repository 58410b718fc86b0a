use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use camstream_frame::packet::{is_reply, packet_name, MEDIA_DATA, MOTION_EVENT};
use camstream_frame::{CloseReason, Frame, FrameHandler};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::error::SessionError;
use crate::event::SessionEvent;
use crate::pending::PendingTable;
use crate::stream::StreamTable;

/// Connection-level state of a [`Session`](crate::Session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    LoggingIn,
    LoggedIn,
    Closed,
}

/// Session-side state reachable from the reader task.
///
/// Routes every decrypted frame to the pending table and the event channel,
/// and tears everything down once when the connection ends.
pub(crate) struct Dispatcher {
    pub(crate) pending: PendingTable,
    pub(crate) streams: StreamTable,
    events: broadcast::Sender<SessionEvent>,
    media: broadcast::Sender<Bytes>,
    state: Mutex<SessionState>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub(crate) fn new(event_capacity: usize, media_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let (media, _) = broadcast::channel(media_capacity.max(1));
        Self {
            pending: PendingTable::new(),
            streams: StreamTable::default(),
            events,
            media,
            state: Mutex::new(SessionState::Disconnected),
            shutdown: CancellationToken::new(),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next` unless the session is already closed.
    pub(crate) fn transition(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != SessionState::Closed && *state != next {
            debug!(from = ?*state, to = ?next, "session state");
            *state = next;
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn subscribe_media(&self) -> broadcast::Receiver<Bytes> {
        self.media.subscribe()
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Cancelled once the connection has ended.
    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// End the session: fail waiters, forget streams, notify subscribers.
    /// Only the first call has any effect.
    pub(crate) fn shut_down(&self, reason: &CloseReason) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }
        self.shutdown.cancel();
        self.pending.fail_all(SessionError::ConnectionClosed);
        self.streams.clear();
        info!(?reason, "session closed");
        self.publish(SessionEvent::Closed);
    }
}

impl FrameHandler for Dispatcher {
    fn on_frame(&self, frame: Frame) {
        match frame.packet_type {
            MOTION_EVENT => self.publish(SessionEvent::Motion(frame.payload.clone())),
            MEDIA_DATA => {
                let _ = self.media.send(frame.payload.clone());
            }
            _ => {}
        }
        let packet_type = frame.packet_type;
        let completed = self.pending.complete(packet_type, frame.payload);
        if completed == 0 && is_reply(packet_type) {
            trace!(packet = packet_name(packet_type), "reply with no waiter");
        }
    }

    fn on_close(&self, reason: &CloseReason) {
        self.shut_down(reason);
    }
}
