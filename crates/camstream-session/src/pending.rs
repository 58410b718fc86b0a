use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{Result, SessionError};

type Slot = oneshot::Sender<Result<Bytes>>;

/// Outstanding requests keyed by the packet type of their reply.
///
/// The protocol carries no request identifier. Every waiter registered for a
/// type is completed by the next frame of that type, so callers must keep at
/// most one logically distinct request per reply type in flight.
#[derive(Debug, Default)]
pub struct PendingTable {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    waiters: HashMap<u32, Vec<Slot>>,
    closed: bool,
}

/// One-shot completion handle returned by [`PendingTable::register`].
#[derive(Debug)]
pub struct Waiter {
    rx: oneshot::Receiver<Result<Bytes>>,
}

impl Waiter {
    /// Resolve with the reply payload, or with the failure the table was
    /// closed with.
    pub async fn wait(self) -> Result<Bytes> {
        self.rx.await.unwrap_or(Err(SessionError::ConnectionClosed))
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter for the next frame of `reply_type`.
    ///
    /// Register before sending the request so a fast reply cannot be missed.
    /// Once the table is closed the waiter resolves to `ConnectionClosed`
    /// immediately. Slots whose waiter was dropped are pruned here, so
    /// abandoned requests for a type that is never answered stay bounded.
    pub fn register(&self, reply_type: u32) -> Waiter {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();
        if inner.closed {
            let _ = tx.send(Err(SessionError::ConnectionClosed));
        } else {
            let slots = inner.waiters.entry(reply_type).or_default();
            slots.retain(|slot| !slot.is_closed());
            slots.push(tx);
        }
        Waiter { rx }
    }

    /// Complete every waiter for `reply_type` with `payload` and clear the
    /// list. Returns how many live waiters were completed.
    pub fn complete(&self, reply_type: u32, payload: Bytes) -> usize {
        let slots = self.lock().waiters.remove(&reply_type).unwrap_or_default();
        let count = slots
            .into_iter()
            .filter_map(|slot| slot.send(Ok(payload.clone())).ok())
            .count();
        if count > 0 {
            trace!(reply_type, waiters = count, "completed pending requests");
        }
        count
    }

    /// Fail every outstanding waiter and refuse new registrations.
    pub fn fail_all(&self, err: SessionError) {
        let drained: Vec<Slot> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.waiters.drain().flat_map(|(_, slots)| slots).collect()
        };
        for slot in drained {
            let _ = slot.send(Err(err.clone()));
        }
    }

    /// Number of live waiters registered for `reply_type`.
    pub fn pending(&self, reply_type: u32) -> usize {
        self.lock().waiters.get(&reply_type).map_or(0, |slots| {
            slots.iter().filter(|slot| !slot.is_closed()).count()
        })
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
