//! Scripted provider for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{ProviderClient, ProviderError, ProviderErrorKind, PullRequestFacts, RunFacts};
use crate::types::{RepoId, Sha};

#[derive(Debug, Default)]
struct MockState {
    runs: HashMap<String, Vec<RunFacts>>,
    pulls: HashMap<String, PullRequestFacts>,
    dispatched: Vec<(RepoId, String, String)>,
    fail_with: Option<ProviderErrorKind>,
    calls: usize,
}

/// Answers from in-memory tables keyed by branch and records dispatches.
#[derive(Debug, Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the runs listed for `branch`. Commit lookups search every branch.
    pub fn set_runs(&self, branch: &str, runs: Vec<RunFacts>) {
        self.lock().runs.insert(branch.to_string(), runs);
    }

    pub fn set_pull_request(&self, branch: &str, pull: PullRequestFacts) {
        self.lock().pulls.insert(branch.to_string(), pull);
    }

    /// Makes every subsequent call fail with `kind` (`None` to recover).
    pub fn fail_with(&self, kind: Option<ProviderErrorKind>) {
        self.lock().fail_with = kind;
    }

    /// Number of provider calls made so far.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    pub fn dispatched(&self) -> Vec<(RepoId, String, String)> {
        self.lock().dispatched.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin_call(&self) -> Result<std::sync::MutexGuard<'_, MockState>, ProviderError> {
        let mut state = self.lock();
        state.calls += 1;
        match state.fail_with {
            Some(kind) => Err(ProviderError {
                kind,
                status_code: None,
                message: "scripted failure".to_string(),
                source: None,
            }),
            None => Ok(state),
        }
    }
}

impl ProviderClient for MockProvider {
    async fn list_runs(&self, _repo: &RepoId, branch: &str) -> Result<Vec<RunFacts>, ProviderError> {
        let state = self.begin_call()?;
        Ok(state.runs.get(branch).cloned().unwrap_or_default())
    }

    async fn list_runs_for_commit(
        &self,
        _repo: &RepoId,
        sha: &Sha,
    ) -> Result<Vec<RunFacts>, ProviderError> {
        let state = self.begin_call()?;
        Ok(state
            .runs
            .values()
            .flatten()
            .filter(|run| &run.head_sha == sha)
            .cloned()
            .collect())
    }

    async fn find_pull_request(
        &self,
        _repo: &RepoId,
        branch: &str,
    ) -> Result<Option<PullRequestFacts>, ProviderError> {
        let state = self.begin_call()?;
        Ok(state.pulls.get(branch).cloned())
    }

    async fn dispatch_workflow(
        &self,
        repo: &RepoId,
        workflow: &str,
        git_ref: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.begin_call()?;
        state
            .dispatched
            .push((repo.clone(), workflow.to_string(), git_ref.to_string()));
        Ok(())
    }
}
