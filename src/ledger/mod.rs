//! Attempt ledger: per-request record of plan/apply/destroy attempts.
//!
//! A stage may be attempted several times (retries); every attempt is kept.
//! The *current* attempt of a stage is the most recently updated attempt of
//! exactly that stage. Lookups never fall back to another stage, so callers
//! can tell "no plan attempt yet" apart from "plan attempt without a run id".
//!
//! # Out-of-order delivery
//!
//! Facts arrive from webhooks and from API refreshes in any order. The ledger
//! drops updates that are older than what it already holds and never moves a
//! completed attempt back to an in-progress status.

pub mod attempt;
pub mod classify;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use attempt::{Attempt, AttemptUpdate, Conclusion, RunStatus, Stage, UnknownValue};
pub use classify::{WorkflowKind, classify_workflow_run};

/// Errors rejecting a ledger update. A rejected update changes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// A conclusion may only accompany a `completed` status.
    #[error("{stage} update carries conclusion {conclusion:?} without a completed status")]
    ConclusionWithoutCompletion {
        stage: Stage,
        status: Option<RunStatus>,
        conclusion: Conclusion,
    },
}

/// Why an update was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The update was observed before the stored attempt was last updated.
    OlderThanRecorded,
    /// The update would move a completed attempt back to in-progress.
    WouldReopenCompleted,
}

/// What `record_attempt` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A new attempt was added for the stage.
    Created,
    /// An existing attempt changed run id, status, or conclusion.
    Updated,
    /// Same facts, newer observation: only the timestamp moved.
    Refreshed,
    Ignored(IgnoreReason),
}

impl RecordOutcome {
    /// True when the ledger's facts changed.
    pub fn changed(&self) -> bool {
        matches!(self, RecordOutcome::Created | RecordOutcome::Updated)
    }
}

/// Per-request record of all observed attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptLedger {
    attempts: Vec<Attempt>,
    next_revision: u64,
}

impl AttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All attempts in insertion order.
    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Records a fact about a stage.
    ///
    /// Upserts the attempt of `update.stage` with the same run id, or creates a
    /// new one. An update without a run id lands on the stage's current attempt
    /// if that attempt has no run id either. An update with a run id adopts a
    /// current attempt that has no run id yet and has not completed (the
    /// dispatch was recorded before the provider assigned the run).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::ConclusionWithoutCompletion`] if the update
    /// carries a conclusion but not a `completed` status.
    pub fn record_attempt(&mut self, update: AttemptUpdate) -> Result<RecordOutcome, LedgerError> {
        if let Some(conclusion) = update.conclusion {
            if update.status != Some(RunStatus::Completed) {
                return Err(LedgerError::ConclusionWithoutCompletion {
                    stage: update.stage,
                    status: update.status,
                    conclusion,
                });
            }
        }

        let Some(index) = self.matching_index(&update) else {
            let revision = self.bump_revision();
            self.attempts.push(Attempt {
                stage: update.stage,
                run_id: update.run_id,
                status: update.status,
                conclusion: update.conclusion,
                updated_at: update.observed_at,
                revision,
            });
            return Ok(RecordOutcome::Created);
        };

        let existing = &self.attempts[index];
        if update.observed_at < existing.updated_at {
            return Ok(RecordOutcome::Ignored(IgnoreReason::OlderThanRecorded));
        }
        if existing.is_completed() && update.status.is_some_and(|s| s.is_in_progress()) {
            return Ok(RecordOutcome::Ignored(IgnoreReason::WouldReopenCompleted));
        }

        let run_id = update.run_id.or(existing.run_id);
        let (status, conclusion) = match update.status {
            Some(RunStatus::Completed) => (
                Some(RunStatus::Completed),
                update.conclusion.or(if existing.is_completed() {
                    existing.conclusion
                } else {
                    None
                }),
            ),
            Some(status) => (Some(status), None),
            None => (existing.status, existing.conclusion),
        };
        let changed =
            run_id != existing.run_id || status != existing.status || conclusion != existing.conclusion;

        let revision = self.bump_revision();
        let attempt = &mut self.attempts[index];
        attempt.run_id = run_id;
        attempt.status = status;
        attempt.conclusion = conclusion;
        attempt.updated_at = update.observed_at;
        attempt.revision = revision;

        Ok(if changed {
            RecordOutcome::Updated
        } else {
            RecordOutcome::Refreshed
        })
    }

    /// Returns the most recently updated attempt of exactly `stage`.
    ///
    /// Returns `None` when the stage has no attempt; never returns an attempt
    /// of another stage.
    pub fn current_attempt_strict(&self, stage: Stage) -> Option<&Attempt> {
        self.current_index(stage).map(|i| &self.attempts[i])
    }

    /// True when the stage's current attempt is still in progress but has
    /// not been updated for longer than `threshold`.
    pub fn is_stale(&self, stage: Stage, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.current_attempt_strict(stage)
            .is_some_and(|a| a.is_in_progress() && now - a.updated_at > threshold)
    }

    /// True when the stage has no attempt, or its current attempt is blank.
    pub fn lacks_facts(&self, stage: Stage) -> bool {
        self.current_attempt_strict(stage).is_none_or(|a| a.is_blank())
    }

    fn current_index(&self, stage: Stage) -> Option<usize> {
        self.attempts
            .iter()
            .enumerate()
            .filter(|(_, a)| a.stage == stage)
            .max_by_key(|(_, a)| (a.updated_at, a.revision))
            .map(|(i, _)| i)
    }

    fn matching_index(&self, update: &AttemptUpdate) -> Option<usize> {
        if let Some(run_id) = update.run_id {
            let by_run = self
                .attempts
                .iter()
                .position(|a| a.stage == update.stage && a.run_id == Some(run_id));
            if by_run.is_some() {
                return by_run;
            }
        }

        let current = self.current_index(update.stage)?;
        let attempt = &self.attempts[current];
        let adoptable = match update.run_id {
            Some(_) => attempt.run_id.is_none() && !attempt.is_completed(),
            None => attempt.run_id.is_none(),
        };
        adoptable.then_some(current)
    }

    fn bump_revision(&mut self) -> u64 {
        let revision = self.next_revision;
        self.next_revision += 1;
        revision
    }
}
