//! Shared test fixtures and arbitrary generators for property-based testing.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use crate::ledger::{AttemptUpdate, Conclusion, RunStatus, Stage};
use crate::provider::RunFacts;
use crate::types::{NewRequest, RepoId, Request, RequestId, RunId, Sha};
use crate::webhooks::{compute_signature, format_signature_header};

/// Fixed base instant (2023-11-14T22:13:20Z) plus `minutes`.
pub fn at_minute(minutes: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::minutes(minutes)
}

/// A request on `infra/live`, branch `tf/<id>`, created at minute 0.
pub fn sample_request(id: &str) -> Request {
    Request::new(
        RequestId::new(id),
        NewRequest {
            project: "network".to_string(),
            environment: "prod".to_string(),
            repo: Some(RepoId::new("infra", "live")),
            branch: Some(format!("tf/{id}")),
        },
        at_minute(0),
    )
}

/// Signs `body` as the provider would.
pub fn sign(body: &[u8], secret: &[u8]) -> String {
    format_signature_header(&compute_signature(body, secret))
}

/// A `workflow_run` webhook body for `infra/live`.
pub fn workflow_run_body(
    run_id: u64,
    name: &str,
    branch: &str,
    head_sha: &str,
    status: &str,
    conclusion: Option<&str>,
    updated_at: &str,
) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "action": if status == "completed" { "completed" } else { "in_progress" },
        "workflow_run": {
            "id": run_id,
            "name": name,
            "head_branch": branch,
            "head_sha": head_sha,
            "status": status,
            "conclusion": conclusion,
            "updated_at": updated_at,
        },
        "repository": {
            "name": "live",
            "owner": { "login": "infra" },
        },
    }))
    .unwrap()
}

/// A `pull_request` webhook body for `infra/live`.
pub fn pull_request_body(
    action: &str,
    number: u64,
    branch: &str,
    merged: bool,
    merge_sha: Option<&str>,
) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "action": action,
        "number": number,
        "pull_request": {
            "number": number,
            "head": { "ref": branch, "sha": "f00d" },
            "merged": merged,
            "merge_commit_sha": merge_sha,
        },
        "repository": {
            "name": "live",
            "owner": { "login": "infra" },
        },
    }))
    .unwrap()
}

/// A provider run report.
pub fn run_facts(
    run_id: u64,
    name: &str,
    branch: &str,
    head_sha: &str,
    status: RunStatus,
    conclusion: Option<Conclusion>,
    minute: i64,
) -> RunFacts {
    RunFacts {
        run_id: RunId(run_id),
        name: name.to_string(),
        head_branch: Some(branch.to_string()),
        head_sha: Sha::new(head_sha),
        status: Some(status),
        conclusion,
        updated_at: at_minute(minute),
    }
}

pub fn arb_stage() -> impl Strategy<Value = Stage> {
    prop_oneof![Just(Stage::Plan), Just(Stage::Apply), Just(Stage::Destroy)]
}

pub fn arb_run_status() -> impl Strategy<Value = RunStatus> {
    prop_oneof![
        Just(RunStatus::Requested),
        Just(RunStatus::Queued),
        Just(RunStatus::Pending),
        Just(RunStatus::Waiting),
        Just(RunStatus::InProgress),
        Just(RunStatus::Completed),
    ]
}

pub fn arb_conclusion() -> impl Strategy<Value = Conclusion> {
    prop_oneof![
        Just(Conclusion::Success),
        Just(Conclusion::Failure),
        Just(Conclusion::Cancelled),
        Just(Conclusion::TimedOut),
        Just(Conclusion::StartupFailure),
        Just(Conclusion::ActionRequired),
        Just(Conclusion::Neutral),
        Just(Conclusion::Skipped),
        Just(Conclusion::Stale),
    ]
}

/// Ledger updates over a small id space so that upserts collide. Mostly
/// consistent, with the occasional conclusion on a non-completed status.
pub fn arb_attempt_update() -> impl Strategy<Value = AttemptUpdate> {
    (
        arb_stage(),
        prop::option::of(1u64..6),
        prop::option::of(arb_run_status()),
        prop::option::of(arb_conclusion()),
        0i64..120,
        0u8..10,
    )
        .prop_map(|(stage, run_id, status, conclusion, minute, roll)| {
            let mut update = AttemptUpdate::new(stage, at_minute(minute));
            if let Some(run_id) = run_id {
                update = update.run_id(run_id);
            }
            if let Some(status) = status {
                update = update.status(status);
            }
            // Conclusions normally only accompany completion.
            if let Some(conclusion) = conclusion {
                if status == Some(RunStatus::Completed) || roll == 0 {
                    update = update.conclusion(conclusion);
                }
            }
            update
        })
}
