//! Aggregate status counts with an explicit cache.
//!
//! Counting statuses means loading and deriving every request, so the result
//! is cached for a short TTL. The cache is a plain value owned by the caller
//! and passed in and out of [`crate::engine::Engine::status_summary`]; there
//! is no hidden global state.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::lifecycle::{CanonicalStatus, StatusClass};

/// Default lifetime of a cached summary (30 seconds).
pub const DEFAULT_SUMMARY_TTL_SECS: i64 = 30;

/// A value together with when it was computed and how long it stays valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cached<T> {
    pub value: T,
    pub computed_at: DateTime<Utc>,
    #[serde(with = "ttl_secs")]
    pub ttl: Duration,
}

impl<T> Cached<T> {
    pub fn new(value: T, computed_at: DateTime<Utc>, ttl: Duration) -> Self {
        Cached {
            value,
            computed_at,
            ttl,
        }
    }

    /// True while `now` is within `ttl` of the computation. A clock that moved
    /// backwards past `computed_at` invalidates the value.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.computed_at && now - self.computed_at < self.ttl
    }
}

mod ttl_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(ttl.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        i64::deserialize(d).map(Duration::seconds)
    }
}

/// Request counts by canonical status and by class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub total: usize,
    pub by_status: BTreeMap<CanonicalStatus, usize>,
    pub active: usize,
    pub idle: usize,
    pub terminal: usize,
}

impl StatusSummary {
    pub fn from_statuses(statuses: impl IntoIterator<Item = CanonicalStatus>) -> Self {
        let mut summary = StatusSummary::default();
        for status in statuses {
            summary.total += 1;
            *summary.by_status.entry(status).or_default() += 1;
            match status.class() {
                StatusClass::Active => summary.active += 1,
                StatusClass::Idle => summary.idle += 1,
                StatusClass::Terminal => summary.terminal += 1,
            }
        }
        summary
    }
}
