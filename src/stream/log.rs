//! Bounded, monotonically sequenced event log.
//!
//! Sequence numbers are derived as `max(now_millis, last_seq + 1)`: close to
//! wall-clock time so they stay fresh across restarts, yet strictly increasing
//! even when the clock steps backwards.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lifecycle::CanonicalStatus;
use crate::types::RequestId;

/// Default number of events retained.
pub const DEFAULT_STREAM_CAPACITY: usize = 200;

/// What happened to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    RequestCreated,
    AttemptRecorded,
    PullRequestUpdated,
    Approved,
    DestroyRequested,
    Repaired,
}

/// One change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub seq: u64,
    pub request_id: RequestId,
    #[serde(rename = "type")]
    pub kind: StreamEventKind,
    /// Status derived right after the change, when the producer knew it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CanonicalStatus>,
    pub ts: DateTime<Utc>,
}

/// Result of reading the log from a sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRead {
    /// The highest sequence number ever assigned.
    pub current_seq: u64,
    /// Retained events with `seq > since`, oldest first.
    pub events: Vec<StreamEvent>,
    /// True when events after `since` were evicted; the reader should fall
    /// back to fetching request state directly.
    pub gap: bool,
}

/// The bounded log. Oldest events are evicted first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLog {
    capacity: usize,
    last_seq: u64,
    /// Sequence number of the newest evicted event (0 if none).
    evicted_through: u64,
    events: VecDeque<StreamEvent>,
}

impl Default for StreamLog {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_CAPACITY)
    }
}

impl StreamLog {
    pub fn new(capacity: usize) -> Self {
        StreamLog {
            capacity: capacity.max(1),
            last_seq: 0,
            evicted_through: 0,
            events: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Changes the capacity, evicting the oldest events if it shrank.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.evict_overflow();
    }

    /// Appends an event and returns it with its assigned sequence number.
    pub fn append(
        &mut self,
        request_id: RequestId,
        kind: StreamEventKind,
        status: Option<CanonicalStatus>,
        now: DateTime<Utc>,
    ) -> StreamEvent {
        let wall = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        let seq = wall.max(self.last_seq + 1);
        self.last_seq = seq;

        let event = StreamEvent {
            seq,
            request_id,
            kind,
            status,
            ts: now,
        };
        self.events.push_back(event.clone());
        self.evict_overflow();
        event
    }

    /// Returns the retained events newer than `since`.
    pub fn read(&self, since: u64) -> StreamRead {
        StreamRead {
            current_seq: self.last_seq,
            events: self
                .events
                .iter()
                .filter(|e| e.seq > since)
                .cloned()
                .collect(),
            gap: since < self.evicted_through,
        }
    }

    fn evict_overflow(&mut self) {
        while self.events.len() > self.capacity {
            if let Some(evicted) = self.events.pop_front() {
                self.evicted_through = evicted.seq;
            }
        }
    }
}
