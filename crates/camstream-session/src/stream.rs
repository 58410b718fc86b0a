use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{Result, SessionError};

/// Logical streams multiplexed over one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Device → client video (and bundled audio).
    Video,
    /// Client → device talk-back audio.
    Talk,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Talk => f.write_str("talk"),
        }
    }
}

/// Lifecycle of one logical stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    /// Start request sent, reply outstanding.
    Starting,
    Active,
    /// Stop request sent, reply outstanding.
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Start,
    Stop,
}

/// A start or stop request in flight.
///
/// Settle it with [`finish`](Self::finish) once the device has answered.
/// Dropping it unsettled (the caller's future was cancelled) rolls the
/// stream back as if the device had rejected the request.
#[must_use = "an unsettled transition rolls back when dropped"]
pub(crate) struct InFlight<'a> {
    table: &'a StreamTable,
    kind: StreamKind,
    direction: Direction,
    main_stream: bool,
    settled: bool,
}

impl InFlight<'_> {
    /// Selector recorded for the stream.
    pub(crate) fn main_stream(&self) -> bool {
        self.main_stream
    }

    pub(crate) fn finish(mut self, accepted: bool) {
        self.settled = true;
        self.table.settle(self.kind, self.direction, accepted);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(
                stream = %self.kind,
                direction = ?self.direction,
                "request abandoned, rolling back"
            );
            self.table.settle(self.kind, self.direction, false);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    state: StreamState,
    main_stream: bool,
}

/// Per-stream state, shared between callers and the close path.
///
/// A stream with no entry is `Idle`. Entries are created by a start and
/// removed by a successful stop, a rejected start, or [`clear`](Self::clear).
#[derive(Debug, Default)]
pub(crate) struct StreamTable {
    entries: Mutex<HashMap<StreamKind, Entry>>,
}

impl StreamTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<StreamKind, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self, kind: StreamKind) -> StreamState {
        self.lock()
            .get(&kind)
            .map_or(StreamState::Idle, |entry| entry.state)
    }

    /// `None` when the stream is already active.
    pub(crate) fn begin_start(
        &self,
        kind: StreamKind,
        main_stream: bool,
    ) -> Result<Option<InFlight<'_>>> {
        let mut entries = self.lock();
        match entries.get(&kind).map(|entry| entry.state) {
            None | Some(StreamState::Idle) => {
                entries.insert(
                    kind,
                    Entry {
                        state: StreamState::Starting,
                        main_stream,
                    },
                );
                Ok(Some(self.in_flight(kind, Direction::Start, main_stream)))
            }
            Some(StreamState::Active) => Ok(None),
            Some(StreamState::Starting | StreamState::Stopping) => {
                Err(SessionError::StreamBusy(kind))
            }
        }
    }

    fn in_flight(&self, kind: StreamKind, direction: Direction, main_stream: bool) -> InFlight<'_> {
        InFlight {
            table: self,
            kind,
            direction,
            main_stream,
            settled: false,
        }
    }

    fn settle(&self, kind: StreamKind, direction: Direction, accepted: bool) {
        match direction {
            Direction::Start => self.finish_start(kind, accepted),
            Direction::Stop => self.finish_stop(kind, accepted),
        }
    }

    fn finish_start(&self, kind: StreamKind, accepted: bool) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(&kind) else {
            return;
        };
        if entry.state != StreamState::Starting {
            return;
        }
        if accepted {
            entry.state = StreamState::Active;
        } else {
            entries.remove(&kind);
        }
    }

    /// `None` when the stream is already idle.
    pub(crate) fn begin_stop(&self, kind: StreamKind) -> Result<Option<InFlight<'_>>> {
        let mut entries = self.lock();
        match entries.get_mut(&kind) {
            None => Ok(None),
            Some(entry) => match entry.state {
                StreamState::Idle => Ok(None),
                StreamState::Active => {
                    entry.state = StreamState::Stopping;
                    let main_stream = entry.main_stream;
                    Ok(Some(self.in_flight(kind, Direction::Stop, main_stream)))
                }
                StreamState::Starting | StreamState::Stopping => {
                    Err(SessionError::StreamBusy(kind))
                }
            },
        }
    }

    fn finish_stop(&self, kind: StreamKind, accepted: bool) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(&kind) else {
            return;
        };
        if entry.state != StreamState::Stopping {
            return;
        }
        if accepted {
            entries.remove(&kind);
        } else {
            entry.state = StreamState::Active;
        }
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }
}
