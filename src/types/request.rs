//! The infrastructure change request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{PrNumber, RepoId, RequestId, RunId, Sha};
use crate::ledger::{AttemptLedger, Stage};
use crate::lifecycle::{CanonicalStatus, derive_status};

/// One infrastructure change: a plan followed by an apply or a destroy.
///
/// The canonical status is never stored; [`Request::status`] derives it from
/// the facts and the ledger every time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub project: String,
    pub environment: String,

    /// Repository whose workflows execute this request. Without it there is
    /// nothing to fetch from the provider.
    pub repo: Option<RepoId>,

    /// Branch carrying the change; used to find the pull request and runs.
    pub branch: Option<String>,

    pub pr: Option<PrNumber>,
    pub merge_sha: Option<Sha>,
    pub approved_at: Option<DateTime<Utc>>,

    /// Run id of the plan attempt that was approved. An approval only
    /// counts while that plan is still the current one.
    #[serde(default)]
    pub approved_plan_run: Option<RunId>,

    pub destroy_requested_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub ledger: AttemptLedger,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequest {
    pub project: String,
    pub environment: String,
    #[serde(default)]
    pub repo: Option<RepoId>,
    #[serde(default)]
    pub branch: Option<String>,
}

/// The non-ledger facts lifecycle derivation looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFacts<'a> {
    pub pr: Option<PrNumber>,
    pub merge_sha: Option<&'a Sha>,
    pub approved: bool,
}

impl Request {
    pub fn new(id: RequestId, params: NewRequest, now: DateTime<Utc>) -> Self {
        Request {
            id,
            project: params.project,
            environment: params.environment,
            repo: params.repo,
            branch: params.branch,
            pr: None,
            merge_sha: None,
            approved_at: None,
            approved_plan_run: None,
            destroy_requested_at: None,
            ledger: AttemptLedger::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn facts(&self) -> RequestFacts<'_> {
        RequestFacts {
            pr: self.pr,
            merge_sha: self.merge_sha.as_ref(),
            approved: self.approves_current_plan(),
        }
    }

    /// True when the recorded approval was given for the current plan
    /// attempt. A newer plan run needs its own approval.
    pub fn approves_current_plan(&self) -> bool {
        self.approved_at.is_some()
            && self
                .ledger
                .current_attempt_strict(Stage::Plan)
                .is_some_and(|plan| plan.run_id == self.approved_plan_run)
    }

    /// Records approval of the current plan attempt.
    pub fn approve(&mut self, now: DateTime<Utc>) {
        self.approved_at = Some(now);
        self.approved_plan_run = self
            .ledger
            .current_attempt_strict(Stage::Plan)
            .and_then(|plan| plan.run_id);
        self.touch(now);
    }

    /// Derives the canonical status from the current facts.
    pub fn status(&self) -> CanonicalStatus {
        derive_status(&self.facts(), &self.ledger)
    }

    /// True when this request runs on the given repository and branch.
    pub fn tracks(&self, repo: &RepoId, branch: &str) -> bool {
        self.repo.as_ref().is_some_and(|r| r.matches(repo)) && self.branch.as_deref() == Some(branch)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{AttemptUpdate, Conclusion, RunStatus};
    use crate::test_utils::{at_minute, sample_request};

    #[test]
    fn new_request_is_created() {
        let request = sample_request("req1");
        assert_eq!(request.status(), CanonicalStatus::Created);
        assert!(request.ledger.is_empty());
    }

    #[test]
    fn tracks_matches_repo_and_branch() {
        let request = sample_request("req1");
        assert!(request.tracks(&RepoId::new("Infra", "Live"), "tf/req1"));
        assert!(!request.tracks(&RepoId::new("infra", "live"), "main"));
        assert!(!request.tracks(&RepoId::new("other", "live"), "tf/req1"));
    }

    #[test]
    fn request_without_repo_tracks_nothing() {
        let mut request = sample_request("req1");
        request.repo = None;
        assert!(!request.tracks(&RepoId::new("infra", "live"), "tf/req1"));
    }

    fn plan_done(run: u64, minute: i64) -> AttemptUpdate {
        AttemptUpdate::new(Stage::Plan, at_minute(minute))
            .run_id(run)
            .status(RunStatus::Completed)
            .conclusion(Conclusion::Success)
    }

    #[test]
    fn approval_is_bound_to_the_approved_plan_run() {
        let mut request = sample_request("req1");
        request.ledger.record_attempt(plan_done(1, 1)).unwrap();
        request.approve(at_minute(2));
        assert_eq!(request.approved_plan_run, Some(RunId(1)));
        assert_eq!(request.status(), CanonicalStatus::Approved);

        request.ledger.record_attempt(plan_done(2, 3)).unwrap();
        assert!(!request.approves_current_plan());
        assert_eq!(request.status(), CanonicalStatus::PlanReady);
    }

    #[test]
    fn approval_without_matching_plan_does_not_count() {
        let mut request = sample_request("req1");
        request.approved_at = Some(at_minute(1));
        assert!(!request.approves_current_plan());

        request.ledger.record_attempt(plan_done(4, 2)).unwrap();
        assert_eq!(request.status(), CanonicalStatus::PlanReady);
    }

    #[test]
    fn serde_roundtrip_keeps_facts() {
        let mut request = sample_request("req1");
        request.pr = Some(PrNumber(12));
        request.merge_sha = Some(Sha::new("abc"));
        request.approved_at = Some(at_minute(3));
        request.approved_plan_run = Some(RunId(9));

        let json = serde_json::to_string(&request).unwrap();
        let parsed: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(request, parsed);
    }
}
