//! GitHub Actions provider backed by octocrab.

use octocrab::Octocrab;
use octocrab::params::State;
use tracing::{debug, warn};

use super::error::ProviderError;
use super::retry::{RetryConfig, retry_with_backoff};
use super::{ProviderClient, PullRequestFacts, RunFacts};
use crate::types::{PrNumber, RepoId, RunId, Sha};

/// Runs fetched per refresh. Requests rarely see more than a handful.
const RUNS_PER_PAGE: u8 = 50;

/// A GitHub client shared across repositories.
#[derive(Clone)]
pub struct OctocrabProvider {
    client: Octocrab,
    retry: RetryConfig,
}

impl OctocrabProvider {
    pub fn new(client: Octocrab) -> Self {
        Self {
            client,
            retry: RetryConfig::DEFAULT,
        }
    }

    /// Creates a provider authenticated with a personal access token.
    pub fn from_token(token: impl Into<String>) -> Result<Self, octocrab::Error> {
        let client = Octocrab::builder().personal_token(token.into()).build()?;
        Ok(Self::new(client))
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_runs(
        &self,
        repo: &RepoId,
        branch: Option<&str>,
    ) -> Result<Vec<RunFacts>, ProviderError> {
        let workflows = self.client.workflows(&repo.owner, &repo.repo);
        let mut request = workflows.list_all_runs().per_page(RUNS_PER_PAGE);
        if let Some(branch) = branch {
            request = request.branch(branch);
        }
        let page = request.send().await.map_err(ProviderError::from_octocrab)?;

        let runs = page
            .items
            .into_iter()
            .map(|run| {
                let status = run.status.parse().ok();
                if status.is_none() {
                    warn!(run_id = run.id.into_inner(), status = %run.status, "Unrecognised run status");
                }
                RunFacts {
                    run_id: RunId(run.id.into_inner()),
                    name: run.name,
                    head_branch: Some(run.head_branch),
                    head_sha: Sha::new(run.head_sha),
                    status,
                    conclusion: run.conclusion.as_deref().and_then(|c| c.parse().ok()),
                    updated_at: run.updated_at,
                }
            })
            .collect();
        Ok(runs)
    }

    async fn fetch_pull_request(
        &self,
        repo: &RepoId,
        branch: &str,
    ) -> Result<Option<PullRequestFacts>, ProviderError> {
        let page = self
            .client
            .pulls(&repo.owner, &repo.repo)
            .list()
            .state(State::All)
            .head(format!("{}:{}", repo.owner, branch))
            .per_page(10)
            .send()
            .await
            .map_err(ProviderError::from_octocrab)?;

        let Some(pull) = page.items.into_iter().next() else {
            return Ok(None);
        };

        let merge_sha = match pull.merged_at {
            Some(_) => {
                // merge_commit_sha lags merged_at briefly after a merge.
                let sha = pull.merge_commit_sha.ok_or_else(|| {
                    ProviderError::transient(format!(
                        "PR #{} is merged but merge_commit_sha not yet available",
                        pull.number
                    ))
                })?;
                Some(Sha::new(sha))
            }
            None => None,
        };

        Ok(Some(PullRequestFacts {
            number: PrNumber(pull.number),
            merge_sha,
        }))
    }
}

impl ProviderClient for OctocrabProvider {
    async fn list_runs(&self, repo: &RepoId, branch: &str) -> Result<Vec<RunFacts>, ProviderError> {
        retry_with_backoff(self.retry, || self.fetch_runs(repo, Some(branch))).await
    }

    async fn list_runs_for_commit(
        &self,
        repo: &RepoId,
        sha: &Sha,
    ) -> Result<Vec<RunFacts>, ProviderError> {
        let runs = retry_with_backoff(self.retry, || self.fetch_runs(repo, None)).await?;
        Ok(runs
            .into_iter()
            .filter(|run| run.head_sha.as_str().eq_ignore_ascii_case(sha.as_str()))
            .collect())
    }

    async fn find_pull_request(
        &self,
        repo: &RepoId,
        branch: &str,
    ) -> Result<Option<PullRequestFacts>, ProviderError> {
        retry_with_backoff(self.retry, || self.fetch_pull_request(repo, branch)).await
    }

    async fn dispatch_workflow(
        &self,
        repo: &RepoId,
        workflow: &str,
        git_ref: &str,
    ) -> Result<(), ProviderError> {
        debug!(repo = %repo, workflow, git_ref, "Dispatching workflow");
        retry_with_backoff(self.retry, || async {
            self.client
                .actions()
                .create_workflow_dispatch(&repo.owner, &repo.repo, workflow, git_ref)
                .send()
                .await
                .map_err(ProviderError::from_octocrab)
        })
        .await
    }
}

impl std::fmt::Debug for OctocrabProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabProvider")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
