//! Repair policy: when to refresh a request's facts from the provider.
//!
//! Webhooks are the primary source of facts, but deliveries get lost. A
//! repair is an API refresh that recovers what webhooks missed. Every repair
//! costs provider API calls, so the policy only asks for one when the client
//! could not otherwise render a meaningful status.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::Stage;
use crate::types::Request;

/// Default age after which an in-progress destroy is presumed to have lost
/// its completion webhook (5 minutes).
pub const DEFAULT_DESTROY_STALE_AFTER_SECS: i64 = 300;

/// Tunables for the repair policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairPolicy {
    pub destroy_stale_after: Duration,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        RepairPolicy {
            destroy_stale_after: Duration::seconds(DEFAULT_DESTROY_STALE_AFTER_SECS),
        }
    }
}

/// Why a repair was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "stage", rename_all = "snake_case")]
pub enum RepairReason {
    /// The destroy attempt reports in-progress but has been silent too long.
    StaleDestroy,
    /// A branch is known but its pull request is not.
    DiscoverPullRequest,
    /// A stage that should have started has no recorded fact at all.
    MissingStageFacts(Stage),
}

/// The outcome of evaluating the repair policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairDecision {
    pub reasons: Vec<RepairReason>,
}

impl RepairDecision {
    pub fn is_needed(&self) -> bool {
        !self.reasons.is_empty()
    }
}

/// Evaluates whether `request` needs a provider refresh.
///
/// A request without repository coordinates never needs one: there is
/// nothing to fetch. Otherwise each rule below adds a reason independently:
///
/// - destroy attempt stale per [`RepairPolicy::destroy_stale_after`]
/// - branch recorded but no pull request
/// - pull request or merge SHA known, and an expected stage lacks any fact.
///   Plan is expected once a pull request exists, apply once merged, and
///   destroy once a destroy was requested.
pub fn needs_repair(request: &Request, policy: &RepairPolicy, now: DateTime<Utc>) -> RepairDecision {
    let mut reasons = Vec::new();

    if request.repo.is_none() {
        return RepairDecision { reasons };
    }

    let ledger = &request.ledger;

    if ledger.is_stale(Stage::Destroy, policy.destroy_stale_after, now) {
        reasons.push(RepairReason::StaleDestroy);
    }

    if request.pr.is_none() && request.branch.is_some() {
        reasons.push(RepairReason::DiscoverPullRequest);
    }

    if request.pr.is_some() || request.merge_sha.is_some() {
        for stage in Stage::ALL {
            if stage_expected(request, stage) && ledger.lacks_facts(stage) {
                reasons.push(RepairReason::MissingStageFacts(stage));
            }
        }
    }

    RepairDecision { reasons }
}

fn stage_expected(request: &Request, stage: Stage) -> bool {
    match stage {
        Stage::Plan => true,
        Stage::Apply => {
            request.merge_sha.is_some()
                && request.destroy_requested_at.is_none()
                && request.ledger.lacks_facts(Stage::Destroy)
        }
        Stage::Destroy => request.destroy_requested_at.is_some(),
    }
}
