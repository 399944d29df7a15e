//! Webhook payload parser.
//!
//! Two event families carry lifecycle facts:
//!
//! - `workflow_run`: a plan/apply/destroy run was requested, progressed, or
//!   completed
//! - `pull_request`: the change's pull request was opened or merged
//!
//! The family is recognised from the payload itself (`workflow_run` or
//! `pull_request` top-level object), so ingestion does not depend on the
//! event-type header. Anything else parses to `Ok(None)`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::ledger::{Conclusion, RunStatus};
use crate::types::{PrNumber, RepoId, RunId, Sha};

/// A payload that could not be understood.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// JSON deserialization failed (includes missing required fields).
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// A webhook event carrying lifecycle facts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    WorkflowRun(WorkflowRunEvent),
    PullRequest(PullRequestEvent),
}

impl WebhookEvent {
    pub fn repo(&self) -> &RepoId {
        match self {
            WebhookEvent::WorkflowRun(e) => &e.repo,
            WebhookEvent::PullRequest(e) => &e.repo,
        }
    }

    /// Branch the event happened on, used to find the request.
    pub fn branch(&self) -> Option<&str> {
        match self {
            WebhookEvent::WorkflowRun(e) => e.head_branch.as_deref(),
            WebhookEvent::PullRequest(e) => Some(&e.head_branch),
        }
    }

    /// Commit the event ran against, when the payload carries one.
    pub fn head_sha(&self) -> Option<&Sha> {
        match self {
            WebhookEvent::WorkflowRun(e) => e.head_sha.as_ref(),
            WebhookEvent::PullRequest(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRunEvent {
    pub repo: RepoId,
    pub run_id: RunId,
    pub name: String,
    pub head_branch: Option<String>,
    pub head_sha: Option<Sha>,
    pub status: Option<RunStatus>,
    pub conclusion: Option<Conclusion>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestChange {
    /// Opened, reopened, or pushed to.
    Opened,
    Merged { merge_sha: Sha },
    /// Closed without merging, edited, labelled, ...
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestEvent {
    pub repo: RepoId,
    pub number: PrNumber,
    pub head_branch: String,
    pub change: PullRequestChange,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    workflow_run: Option<serde_json::Value>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    owner: RawOwner,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawWorkflowRunPayload {
    workflow_run: RawWorkflowRun,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawWorkflowRun {
    id: u64,
    name: Option<String>,
    head_branch: Option<String>,
    head_sha: Option<String>,
    status: Option<String>,
    conclusion: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RawPullRequestPayload {
    action: String,
    number: u64,
    pull_request: RawPullRequest,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    head: RawRef,
    #[serde(default)]
    merged: Option<bool>,
    merge_commit_sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    #[serde(rename = "ref")]
    ref_field: String,
}

impl From<RawRepository> for RepoId {
    fn from(raw: RawRepository) -> Self {
        RepoId::new(raw.owner.login, raw.name)
    }
}

/// Parses a raw webhook body.
///
/// Returns `Ok(None)` for payloads of other event families.
pub fn parse_payload(body: &[u8]) -> Result<Option<WebhookEvent>, PayloadError> {
    let envelope: RawEnvelope = serde_json::from_slice(body)?;

    if envelope.workflow_run.is_some() {
        let raw: RawWorkflowRunPayload = serde_json::from_slice(body)?;
        return parse_workflow_run(raw).map(|e| Some(WebhookEvent::WorkflowRun(e)));
    }
    if envelope.pull_request.is_some() {
        let raw: RawPullRequestPayload = serde_json::from_slice(body)?;
        return parse_pull_request(raw).map(|e| Some(WebhookEvent::PullRequest(e)));
    }
    Ok(None)
}

fn parse_workflow_run(raw: RawWorkflowRunPayload) -> Result<WorkflowRunEvent, PayloadError> {
    let run = raw.workflow_run;

    let status = run
        .status
        .map(|s| {
            s.parse::<RunStatus>().map_err(|_| PayloadError::InvalidField {
                field: "workflow_run.status",
                value: s,
            })
        })
        .transpose()?;
    let conclusion = run
        .conclusion
        .map(|c| {
            c.parse::<Conclusion>().map_err(|_| PayloadError::InvalidField {
                field: "workflow_run.conclusion",
                value: c,
            })
        })
        .transpose()?;

    Ok(WorkflowRunEvent {
        repo: raw.repository.into(),
        run_id: RunId(run.id),
        name: run.name.unwrap_or_default(),
        head_branch: run.head_branch,
        head_sha: run.head_sha.map(Sha::new),
        status,
        conclusion,
        updated_at: run.updated_at,
    })
}

fn parse_pull_request(raw: RawPullRequestPayload) -> Result<PullRequestEvent, PayloadError> {
    let change = match raw.action.as_str() {
        "opened" | "reopened" | "synchronize" => PullRequestChange::Opened,
        "closed" if raw.pull_request.merged == Some(true) => {
            let sha = raw
                .pull_request
                .merge_commit_sha
                .filter(|s| !s.is_empty())
                .ok_or_else(|| PayloadError::InvalidField {
                    field: "pull_request.merge_commit_sha",
                    value: "null".to_string(),
                })?;
            PullRequestChange::Merged {
                merge_sha: Sha::new(sha),
            }
        }
        _ => PullRequestChange::Other,
    };

    Ok(PullRequestEvent {
        repo: raw.repository.into(),
        number: PrNumber(raw.number),
        head_branch: raw.pull_request.head.ref_field,
        change,
    })
}
