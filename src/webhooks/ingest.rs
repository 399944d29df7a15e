//! Applying webhook events to requests.
//!
//! A delivery moves through `received → signature-verified → deduplicated →
//! classified → ledger-updated → stream-appended → acknowledged`. The stores
//! and the stream live in the engine; this module holds the outcome types and
//! the pure step that folds one parsed event into a request.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::payload::{PullRequestChange, WebhookEvent, WorkflowRunEvent};
use super::signature::SignatureError;
use crate::ledger::{AttemptUpdate, RecordOutcome, classify_workflow_run};
use crate::stream::StreamEventKind;
use crate::types::{Request, RequestId};

/// Why a verified delivery was acknowledged without touching any request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The run name matches no plan/apply/destroy/cleanup keyword.
    UnclassifiedWorkflow,
    /// The run is recognised but does not belong to a ledger stage (cleanup).
    NoLedgerStage,
    /// Not a `workflow_run` or `pull_request` payload.
    UnsupportedEvent,
    /// The body did not parse.
    MalformedPayload,
    /// No request tracks the event's repository and branch.
    UnknownRequest,
    /// A pull request action that carries no lifecycle fact.
    IrrelevantAction,
    /// The ledger refused the update (conclusion without completion).
    RejectedUpdate,
}

/// What happened to a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Processed. `seq` is the stream event appended, if the request changed.
    Accepted {
        request_id: RequestId,
        seq: Option<u64>,
    },
    Rejected(SignatureError),
    /// Already processed; nothing was done.
    Duplicate,
    Skipped(SkipReason),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Accepted { .. } => "accepted",
            Outcome::Rejected(_) => "rejected",
            Outcome::Duplicate => "duplicate",
            Outcome::Skipped(_) => "skipped",
        }
    }
}

/// What folding an event did to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventEffect {
    /// Facts changed; announce with this stream event kind.
    Changed(StreamEventKind),
    /// Same facts observed again; only ledger timestamps moved. Worth saving
    /// so the attempt does not look stale, not worth announcing.
    Refreshed,
    /// Redundant or out-of-date delivery.
    Unchanged,
}

impl EventEffect {
    /// True when the request must be written back.
    pub fn needs_save(&self) -> bool {
        !matches!(self, EventEffect::Unchanged)
    }
}

/// Checks that an event can affect some request before one is looked up.
pub fn precheck(event: &WebhookEvent) -> Result<(), SkipReason> {
    match event {
        WebhookEvent::WorkflowRun(run) => match classify_workflow_run(&run.name) {
            None => Err(SkipReason::UnclassifiedWorkflow),
            Some(kind) if kind.stage().is_none() => Err(SkipReason::NoLedgerStage),
            Some(_) => Ok(()),
        },
        WebhookEvent::PullRequest(pr) if pr.change == PullRequestChange::Other => {
            Err(SkipReason::IrrelevantAction)
        }
        WebhookEvent::PullRequest(_) => Ok(()),
    }
}

/// Folds `event` into `request`.
pub fn apply_event(
    request: &mut Request,
    event: &WebhookEvent,
    now: DateTime<Utc>,
) -> Result<EventEffect, SkipReason> {
    precheck(event)?;

    let effect = match event {
        WebhookEvent::WorkflowRun(run) => apply_run(request, run)?,
        WebhookEvent::PullRequest(pr) => {
            let mut changed = request.pr != Some(pr.number);
            request.pr = Some(pr.number);
            if let PullRequestChange::Merged { merge_sha } = &pr.change {
                changed |= request.merge_sha.as_ref() != Some(merge_sha);
                request.merge_sha = Some(merge_sha.clone());
            }
            if changed {
                EventEffect::Changed(StreamEventKind::PullRequestUpdated)
            } else {
                EventEffect::Unchanged
            }
        }
    };

    if effect.needs_save() {
        request.touch(now);
    }
    Ok(effect)
}

fn apply_run(request: &mut Request, run: &WorkflowRunEvent) -> Result<EventEffect, SkipReason> {
    let stage = classify_workflow_run(&run.name)
        .and_then(|kind| kind.stage())
        .ok_or(SkipReason::NoLedgerStage)?;

    let mut update = AttemptUpdate::new(stage, run.updated_at).run_id(run.run_id);
    if let Some(status) = run.status {
        update = update.status(status);
    }
    // A conclusion without a completed status is passed through so the
    // ledger rejects the whole update.
    if let Some(conclusion) = run.conclusion {
        update = update.conclusion(conclusion);
    }

    match request.ledger.record_attempt(update) {
        Ok(RecordOutcome::Created) | Ok(RecordOutcome::Updated) => {
            Ok(EventEffect::Changed(StreamEventKind::AttemptRecorded))
        }
        Ok(RecordOutcome::Refreshed) => Ok(EventEffect::Refreshed),
        Ok(RecordOutcome::Ignored(_)) => Ok(EventEffect::Unchanged),
        Err(_) => Err(SkipReason::RejectedUpdate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Conclusion, RunStatus, Stage};
    use crate::lifecycle::CanonicalStatus;
    use crate::test_utils::{at_minute, sample_request};
    use crate::types::{PrNumber, RepoId, RunId, Sha};
    use crate::webhooks::payload::PullRequestEvent;

    fn run(
        name: &str,
        id: u64,
        status: RunStatus,
        conclusion: Option<Conclusion>,
        minute: i64,
    ) -> WebhookEvent {
        WebhookEvent::WorkflowRun(WorkflowRunEvent {
            repo: RepoId::new("infra", "live"),
            run_id: RunId(id),
            name: name.to_string(),
            head_branch: Some("tf/req1".to_string()),
            head_sha: None,
            status: Some(status),
            conclusion,
            updated_at: at_minute(minute),
        })
    }

    #[test]
    fn plan_run_lands_in_plan_stage() {
        let mut request = sample_request("req1");
        let effect = apply_event(
            &mut request,
            &run("Terraform Plan", 1, RunStatus::InProgress, None, 1),
            at_minute(1),
        )
        .unwrap();

        assert_eq!(effect, EventEffect::Changed(StreamEventKind::AttemptRecorded));
        assert!(request.ledger.current_attempt_strict(Stage::Plan).is_some());
        assert_eq!(request.status(), CanonicalStatus::Planning);
        assert_eq!(request.updated_at, at_minute(1));
    }

    #[test]
    fn cleanup_and_unknown_runs_are_skipped() {
        let mut request = sample_request("req1");
        assert_eq!(
            apply_event(
                &mut request,
                &run("Workspace Cleanup", 1, RunStatus::Completed, Some(Conclusion::Success), 1),
                at_minute(1),
            ),
            Err(SkipReason::NoLedgerStage)
        );
        assert_eq!(
            apply_event(
                &mut request,
                &run("Lint", 2, RunStatus::Completed, Some(Conclusion::Success), 1),
                at_minute(1),
            ),
            Err(SkipReason::UnclassifiedWorkflow)
        );
        assert!(request.ledger.is_empty());
    }

    #[test]
    fn redelivered_run_reports_no_change() {
        let mut request = sample_request("req1");
        let event = run("plan", 1, RunStatus::Completed, Some(Conclusion::Success), 2);
        apply_event(&mut request, &event, at_minute(2)).unwrap();
        assert_eq!(
            apply_event(&mut request, &event, at_minute(3)),
            Ok(EventEffect::Refreshed)
        );

        let older = run("plan", 1, RunStatus::InProgress, None, 1);
        assert_eq!(
            apply_event(&mut request, &older, at_minute(3)),
            Ok(EventEffect::Unchanged)
        );
    }

    #[test]
    fn conclusion_without_completion_is_rejected() {
        let mut request = sample_request("req1");
        let event = run("plan", 1, RunStatus::InProgress, Some(Conclusion::Failure), 2);
        assert_eq!(
            apply_event(&mut request, &event, at_minute(2)),
            Err(SkipReason::RejectedUpdate)
        );
        assert!(request.ledger.is_empty());
    }

    #[test]
    fn merged_pull_request_records_sha() {
        let mut request = sample_request("req1");
        let event = WebhookEvent::PullRequest(PullRequestEvent {
            repo: RepoId::new("infra", "live"),
            number: PrNumber(5),
            head_branch: "tf/req1".to_string(),
            change: PullRequestChange::Merged {
                merge_sha: Sha::new("cafe"),
            },
        });

        assert_eq!(
            apply_event(&mut request, &event, at_minute(1)),
            Ok(EventEffect::Changed(StreamEventKind::PullRequestUpdated))
        );
        assert_eq!(request.pr, Some(PrNumber(5)));
        assert_eq!(request.merge_sha, Some(Sha::new("cafe")));
        assert_eq!(
            apply_event(&mut request, &event, at_minute(2)),
            Ok(EventEffect::Unchanged)
        );
    }
}
