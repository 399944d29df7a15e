//! Repairs: refreshing a request's facts from the provider.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Engine, EngineError, StatusView};
use crate::ledger::{AttemptUpdate, RecordOutcome, RunStatus, classify_workflow_run};
use crate::lifecycle::CanonicalStatus;
use crate::provider::{ProviderClient, PullRequestFacts, RunFacts};
use crate::repair::{RepairDecision, needs_repair};
use crate::stream::StreamEventKind;
use crate::types::{Request, RequestId};

/// What a refresh did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub request_id: RequestId,
    pub status: CanonicalStatus,
    pub decision: RepairDecision,
    /// True when the provider was consulted.
    pub repaired: bool,
    /// True when the consultation changed the request's facts.
    pub changed: bool,
}

/// Facts fetched from the provider for one request.
#[derive(Debug, Default)]
struct FetchedFacts {
    pull: Option<PullRequestFacts>,
    runs: Vec<RunFacts>,
}

impl<P: ProviderClient> Engine<P> {
    /// Repairs the request if the repair policy asks for it, then derives
    /// its status.
    ///
    /// Safe to retry: applying the same provider facts twice changes nothing
    /// the second time.
    pub async fn refresh(&self, id: &RequestId) -> Result<RefreshReport, EngineError> {
        let request = self.get_request(id)?;
        let decision = needs_repair(&request, &self.settings.repair, self.clock.now());
        if !decision.is_needed() {
            return Ok(RefreshReport {
                request_id: request.id.clone(),
                status: request.status(),
                decision,
                repaired: false,
                changed: false,
            });
        }

        debug!(request_id = %id, reasons = ?decision.reasons, "Repairing request");
        let fetched = self.fetch_facts(&request).await?;

        // Re-read: ingestion may have written while the fetch was in flight.
        let mut request = self.get_request(id)?;
        let (changed, dirty) = apply_fetched(&mut request, &fetched);
        let now = self.clock.now();
        if dirty {
            request.touch(now);
            self.requests.put(&request)?;
        }
        let status = request.status();
        if changed {
            self.stream
                .append(request.id.clone(), StreamEventKind::Repaired, Some(status))?;
            info!(request_id = %id, status = %status, "Repaired request");
        }

        Ok(RefreshReport {
            request_id: request.id,
            status,
            decision,
            repaired: true,
            changed,
        })
    }

    /// Refreshes if needed and returns the status with a polling hint.
    ///
    /// A provider failure does not fail the poll: the last known status is
    /// returned with the error attached, and a rate limit switches the hint
    /// to the backoff interval.
    pub async fn poll_status(
        &self,
        id: &RequestId,
        tab_hidden: bool,
    ) -> Result<StatusView, EngineError> {
        let (status, rate_limited, refresh_error) = match self.refresh(id).await {
            Ok(report) => (report.status, false, None),
            Err(EngineError::Upstream(e)) => {
                warn!(request_id = %id, error = %e, "Repair failed, returning last known status");
                (
                    self.canonical_status(id)?,
                    e.is_rate_limited(),
                    Some(e.to_string()),
                )
            }
            Err(e) => return Err(e),
        };

        let poll_after = self.polling_interval(status, tab_hidden, rate_limited);
        Ok(StatusView {
            request_id: id.clone(),
            status,
            class: status.class(),
            poll_after_ms: u64::try_from(poll_after.as_millis()).unwrap_or(u64::MAX),
            rate_limited,
            refresh_error,
        })
    }

    async fn fetch_facts(&self, request: &Request) -> Result<FetchedFacts, EngineError> {
        let mut fetched = FetchedFacts::default();
        let Some(repo) = request.repo.as_ref() else {
            return Ok(fetched);
        };

        if let Some(branch) = request.branch.as_deref() {
            if request.pr.is_none() || request.merge_sha.is_none() {
                fetched.pull = self.provider.find_pull_request(repo, branch).await?;
            }
            fetched.runs = self.provider.list_runs(repo, branch).await?;
        }

        let merge_sha = request
            .merge_sha
            .clone()
            .or_else(|| fetched.pull.as_ref().and_then(|p| p.merge_sha.clone()));
        if let Some(sha) = merge_sha {
            for run in self.provider.list_runs_for_commit(repo, &sha).await? {
                if !fetched.runs.iter().any(|r| r.run_id == run.run_id) {
                    fetched.runs.push(run);
                }
            }
        }

        Ok(fetched)
    }
}

/// Applies fetched facts. Returns `(changed, dirty)`: whether facts changed,
/// and whether anything (including ledger timestamps) needs saving.
fn apply_fetched(request: &mut Request, fetched: &FetchedFacts) -> (bool, bool) {
    let mut changed = false;
    let mut dirty = false;

    if let Some(pull) = &fetched.pull {
        if request.pr != Some(pull.number) {
            request.pr = Some(pull.number);
            changed = true;
        }
        if let Some(sha) = &pull.merge_sha {
            if request.merge_sha.as_ref() != Some(sha) {
                request.merge_sha = Some(sha.clone());
                changed = true;
            }
        }
    }

    let mut runs: Vec<&RunFacts> = fetched.runs.iter().collect();
    runs.sort_by_key(|r| (r.updated_at, r.run_id));

    for run in runs {
        let Some(stage) = classify_workflow_run(&run.name).and_then(|k| k.stage()) else {
            continue;
        };

        let mut update = AttemptUpdate::new(stage, run.updated_at).run_id(run.run_id);
        if let Some(status) = run.status {
            update = update.status(status);
        }
        if run.status == Some(RunStatus::Completed) {
            if let Some(conclusion) = run.conclusion {
                update = update.conclusion(conclusion);
            }
        }

        match request.ledger.record_attempt(update) {
            Ok(RecordOutcome::Created) | Ok(RecordOutcome::Updated) => changed = true,
            Ok(RecordOutcome::Refreshed) => dirty = true,
            Ok(RecordOutcome::Ignored(_)) => {}
            Err(e) => debug!(request_id = %request.id, run_id = %run.run_id, error = %e, "Skipped provider run"),
        }
    }

    (changed, changed || dirty)
}
