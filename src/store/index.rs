//! Lookup index from event coordinates to request ids.
//!
//! Webhooks identify their request by repository plus branch, or by the
//! merge commit once the pull request has merged. The index maps both keys
//! to request ids so a delivery reads only the snapshots it may belong to.
//!
//! Entries are only ever added. A request's branch never changes and its
//! merge commit goes from unset to set, so a stale entry can only name a
//! request that no longer matches; callers re-check candidates against the
//! snapshot they load.

use std::collections::{BTreeSet, HashMap};

use crate::types::{RepoId, Request, RequestId, Sha};

#[derive(Debug, Default)]
pub struct RequestIndex {
    by_branch: HashMap<(String, String), BTreeSet<RequestId>>,
    by_merge_sha: HashMap<(String, String), BTreeSet<RequestId>>,
}

impl RequestIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes a request under its branch and merge commit.
    pub fn insert(&mut self, request: &Request) {
        let Some(repo) = &request.repo else {
            return;
        };
        if let Some(branch) = &request.branch {
            self.by_branch
                .entry((repo_key(repo), branch.clone()))
                .or_default()
                .insert(request.id.clone());
        }
        if let Some(sha) = &request.merge_sha {
            self.by_merge_sha
                .entry((repo_key(repo), sha_key(sha)))
                .or_default()
                .insert(request.id.clone());
        }
    }

    /// Ids of requests indexed under `repo` with `branch` or `head_sha`.
    pub fn lookup(&self, repo: &RepoId, branch: Option<&str>, head_sha: Option<&Sha>) -> Vec<RequestId> {
        let repo = repo_key(repo);
        let mut ids = BTreeSet::new();
        if let Some(branch) = branch {
            if let Some(found) = self.by_branch.get(&(repo.clone(), branch.to_string())) {
                ids.extend(found.iter().cloned());
            }
        }
        if let Some(sha) = head_sha {
            if let Some(found) = self.by_merge_sha.get(&(repo, sha_key(sha))) {
                ids.extend(found.iter().cloned());
            }
        }
        ids.into_iter().collect()
    }
}

fn repo_key(repo: &RepoId) -> String {
    format!(
        "{}/{}",
        repo.owner.to_ascii_lowercase(),
        repo.repo.to_ascii_lowercase()
    )
}

fn sha_key(sha: &Sha) -> String {
    sha.as_str().to_ascii_lowercase()
}
