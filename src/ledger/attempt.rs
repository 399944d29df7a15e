//! Attempt types: one observed execution of a pipeline stage.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::RunId;

/// A pipeline stage tracked by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Plan,
    Apply,
    Destroy,
}

impl Stage {
    /// All stages, least advanced first.
    pub const ALL: [Stage; 3] = [Stage::Plan, Stage::Apply, Stage::Destroy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Plan => "plan",
            Stage::Apply => "apply",
            Stage::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run status as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Requested,
    Queued,
    Pending,
    Waiting,
    InProgress,
    Completed,
}

impl RunStatus {
    /// Returns true for every status except `completed`.
    pub fn is_in_progress(&self) -> bool {
        !matches!(self, RunStatus::Completed)
    }
}

/// Unrecognised provider status or conclusion string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised value: {0}")]
pub struct UnknownValue(pub String);

impl FromStr for RunStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(RunStatus::Requested),
            "queued" => Ok(RunStatus::Queued),
            "pending" => Ok(RunStatus::Pending),
            "waiting" => Ok(RunStatus::Waiting),
            "in_progress" => Ok(RunStatus::InProgress),
            "completed" => Ok(RunStatus::Completed),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

/// Final conclusion of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Success,
    Failure,
    Cancelled,
    TimedOut,
    StartupFailure,
    ActionRequired,
    Neutral,
    Skipped,
    Stale,
}

impl Conclusion {
    pub fn is_success(&self) -> bool {
        matches!(self, Conclusion::Success)
    }

    /// Conclusions that end a stage without the desired effect.
    ///
    /// `neutral` and `skipped` are neither success nor failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Conclusion::Failure
                | Conclusion::Cancelled
                | Conclusion::TimedOut
                | Conclusion::StartupFailure
                | Conclusion::ActionRequired
                | Conclusion::Stale
        )
    }
}

impl FromStr for Conclusion {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Conclusion::Success),
            "failure" => Ok(Conclusion::Failure),
            "cancelled" => Ok(Conclusion::Cancelled),
            "timed_out" => Ok(Conclusion::TimedOut),
            "startup_failure" => Ok(Conclusion::StartupFailure),
            "action_required" => Ok(Conclusion::ActionRequired),
            "neutral" => Ok(Conclusion::Neutral),
            "skipped" => Ok(Conclusion::Skipped),
            "stale" => Ok(Conclusion::Stale),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

/// One observed execution of a pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub stage: Stage,
    pub run_id: Option<RunId>,
    pub status: Option<RunStatus>,
    pub conclusion: Option<Conclusion>,
    pub updated_at: DateTime<Utc>,

    /// Ledger-local write counter; breaks ties between equal `updated_at`.
    pub revision: u64,
}

impl Attempt {
    /// True when the attempt carries no run id, status, or conclusion.
    pub fn is_blank(&self) -> bool {
        self.run_id.is_none() && self.status.is_none() && self.conclusion.is_none()
    }

    /// True when the provider reports the run as still going.
    pub fn is_in_progress(&self) -> bool {
        self.status.is_some_and(|s| s.is_in_progress())
    }

    pub fn is_completed(&self) -> bool {
        self.status == Some(RunStatus::Completed)
    }

    pub fn succeeded(&self) -> bool {
        self.is_completed() && self.conclusion.is_some_and(|c| c.is_success())
    }

    pub fn failed(&self) -> bool {
        self.is_completed() && self.conclusion.is_some_and(|c| c.is_failure())
    }
}

/// A fact about one stage, as observed from a webhook or an API refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptUpdate {
    pub stage: Stage,
    pub run_id: Option<RunId>,
    pub status: Option<RunStatus>,
    pub conclusion: Option<Conclusion>,

    /// When the provider last changed the run (or when we observed it).
    pub observed_at: DateTime<Utc>,
}

impl AttemptUpdate {
    pub fn new(stage: Stage, observed_at: DateTime<Utc>) -> Self {
        AttemptUpdate {
            stage,
            run_id: None,
            status: None,
            conclusion: None,
            observed_at,
        }
    }

    pub fn run_id(mut self, run_id: impl Into<RunId>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn conclusion(mut self, conclusion: Conclusion) -> Self {
        self.conclusion = Some(conclusion);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_parses_provider_values() {
        assert_eq!("queued".parse::<RunStatus>(), Ok(RunStatus::Queued));
        assert_eq!("in_progress".parse::<RunStatus>(), Ok(RunStatus::InProgress));
        assert_eq!("completed".parse::<RunStatus>(), Ok(RunStatus::Completed));
        assert!("done".parse::<RunStatus>().is_err());
    }

    #[test]
    fn only_completed_is_not_in_progress() {
        assert!(!RunStatus::Completed.is_in_progress());
        assert!(RunStatus::Queued.is_in_progress());
        assert!(RunStatus::Waiting.is_in_progress());
        assert!(RunStatus::InProgress.is_in_progress());
    }

    #[test]
    fn neutral_and_skipped_are_neither_success_nor_failure() {
        for c in [Conclusion::Neutral, Conclusion::Skipped] {
            assert!(!c.is_success());
            assert!(!c.is_failure());
        }
        assert!(Conclusion::Cancelled.is_failure());
        assert!(Conclusion::TimedOut.is_failure());
    }

    #[test]
    fn stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::Destroy).unwrap();
        assert_eq!(json, "\"destroy\"");
    }

    #[test]
    fn blank_attempt_has_no_facts() {
        let attempt = Attempt {
            stage: Stage::Plan,
            run_id: None,
            status: None,
            conclusion: None,
            updated_at: Utc::now(),
            revision: 0,
        };
        assert!(attempt.is_blank());
        assert!(!attempt.is_in_progress());
        assert!(!attempt.succeeded());
    }
}
