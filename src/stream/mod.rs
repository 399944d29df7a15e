//! Event stream: low-latency change notifications for live clients.
//!
//! The stream is a best-effort channel, not the source of truth. Subscribers
//! read from their last seen sequence number; when the bounded window has
//! moved past it they fall back to fetching request state directly.
//!
//! Every append is written through to the [`StreamStore`] so that the last
//! sequence number survives restarts. Another process appending to the same
//! store races with this one (load-modify-save); sequence numbers stay
//! monotonic within each writer but one writer's events may be dropped from
//! the persisted window.

pub mod log;

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::clock::Clock;
use crate::lifecycle::CanonicalStatus;
use crate::store::{self, StreamStore};
use crate::types::RequestId;

pub use log::{DEFAULT_STREAM_CAPACITY, StreamEvent, StreamEventKind, StreamLog, StreamRead};

/// The shared stream log.
pub struct EventStream {
    log: Mutex<StreamLog>,
    store: Arc<dyn StreamStore>,
    clock: Arc<dyn Clock>,
}

impl EventStream {
    /// Opens the stream, resuming from the persisted log if there is one.
    pub fn open(
        store: Arc<dyn StreamStore>,
        clock: Arc<dyn Clock>,
        capacity: usize,
    ) -> store::Result<Self> {
        let log = match store.load_stream()? {
            Some(mut log) => {
                log.set_capacity(capacity);
                debug!(last_seq = log.last_seq(), retained = log.len(), "Resumed event stream");
                log
            }
            None => StreamLog::new(capacity),
        };

        Ok(EventStream {
            log: Mutex::new(log),
            store,
            clock,
        })
    }

    /// Appends an event and persists the log. Returns the stored event.
    pub fn append(
        &self,
        request_id: RequestId,
        kind: StreamEventKind,
        status: Option<CanonicalStatus>,
    ) -> store::Result<StreamEvent> {
        let mut log = self.lock();
        let event = log.append(request_id, kind, status, self.clock.now());
        self.store.save_stream(&log)?;
        Ok(event)
    }

    /// Reads the retained events newer than `since`.
    pub fn read(&self, since: u64) -> StreamRead {
        self.lock().read(since)
    }

    fn lock(&self) -> MutexGuard<'_, StreamLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }
}
