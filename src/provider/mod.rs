//! CI provider contract and its GitHub implementation.
//!
//! The engine only reads workflow runs (by branch or by commit) and the pull
//! request for a branch, and dispatches the destroy workflow. Everything else
//! about the provider stays behind this seam.

mod error;
mod github;
#[cfg(test)]
pub mod mock;
mod retry;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::{Conclusion, RunStatus};
use crate::types::{PrNumber, RepoId, RunId, Sha};

pub use error::{ProviderError, ProviderErrorKind};
pub use github::OctocrabProvider;
pub use retry::{RetryConfig, retry_with_backoff};

/// One workflow run as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFacts {
    pub run_id: RunId,
    pub name: String,
    pub head_branch: Option<String>,
    pub head_sha: Sha,
    /// `None` when the provider reported a value this crate does not know.
    pub status: Option<RunStatus>,
    pub conclusion: Option<Conclusion>,
    pub updated_at: DateTime<Utc>,
}

/// The pull request opened from a request's branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestFacts {
    pub number: PrNumber,
    /// Set once the pull request has been merged.
    pub merge_sha: Option<Sha>,
}

/// Read and dispatch access to the CI provider.
///
/// Implementations retry transient failures themselves; a returned error is
/// final for this call.
pub trait ProviderClient: Send + Sync {
    /// Workflow runs triggered on `branch`, newest first.
    fn list_runs(
        &self,
        repo: &RepoId,
        branch: &str,
    ) -> impl Future<Output = Result<Vec<RunFacts>, ProviderError>> + Send;

    /// Recent workflow runs on any branch whose head commit is `sha`.
    ///
    /// Apply runs triggered by a merge run on the base branch, so they are
    /// found by the merge commit rather than by the request's branch.
    fn list_runs_for_commit(
        &self,
        repo: &RepoId,
        sha: &Sha,
    ) -> impl Future<Output = Result<Vec<RunFacts>, ProviderError>> + Send;

    /// The most recent pull request whose head is `branch`, if any.
    fn find_pull_request(
        &self,
        repo: &RepoId,
        branch: &str,
    ) -> impl Future<Output = Result<Option<PullRequestFacts>, ProviderError>> + Send;

    /// Triggers a `workflow_dispatch` of `workflow` on `git_ref`.
    fn dispatch_workflow(
        &self,
        repo: &RepoId,
        workflow: &str,
        git_ref: &str,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;
}
