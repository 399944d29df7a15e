//! Canonical request status and its polling classes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The single lifecycle state shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStatus {
    Created,
    Planning,
    PlanReady,
    PlanFailed,
    Approved,
    Merged,
    Applying,
    Applied,
    ApplyFailed,
    Destroying,
    Destroyed,
    DestroyFailed,
    /// The facts are missing or conflicting; surfaced instead of guessed.
    Unknown,
}

/// How a status drives polling and repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    /// An operation is in flight.
    Active,
    /// Waiting on a decision or on missing facts.
    Idle,
    /// No further transitions are expected.
    Terminal,
}

impl CanonicalStatus {
    pub const ALL: [CanonicalStatus; 13] = [
        CanonicalStatus::Created,
        CanonicalStatus::Planning,
        CanonicalStatus::PlanReady,
        CanonicalStatus::PlanFailed,
        CanonicalStatus::Approved,
        CanonicalStatus::Merged,
        CanonicalStatus::Applying,
        CanonicalStatus::Applied,
        CanonicalStatus::ApplyFailed,
        CanonicalStatus::Destroying,
        CanonicalStatus::Destroyed,
        CanonicalStatus::DestroyFailed,
        CanonicalStatus::Unknown,
    ];

    pub fn class(&self) -> StatusClass {
        match self {
            CanonicalStatus::Planning | CanonicalStatus::Applying | CanonicalStatus::Destroying => {
                StatusClass::Active
            }
            CanonicalStatus::Created
            | CanonicalStatus::PlanReady
            | CanonicalStatus::Approved
            | CanonicalStatus::Merged
            | CanonicalStatus::Unknown => StatusClass::Idle,
            CanonicalStatus::PlanFailed
            | CanonicalStatus::Applied
            | CanonicalStatus::ApplyFailed
            | CanonicalStatus::Destroyed
            | CanonicalStatus::DestroyFailed => StatusClass::Terminal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.class() == StatusClass::Terminal
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalStatus::Created => "created",
            CanonicalStatus::Planning => "planning",
            CanonicalStatus::PlanReady => "plan_ready",
            CanonicalStatus::PlanFailed => "plan_failed",
            CanonicalStatus::Approved => "approved",
            CanonicalStatus::Merged => "merged",
            CanonicalStatus::Applying => "applying",
            CanonicalStatus::Applied => "applied",
            CanonicalStatus::ApplyFailed => "apply_failed",
            CanonicalStatus::Destroying => "destroying",
            CanonicalStatus::Destroyed => "destroyed",
            CanonicalStatus::DestroyFailed => "destroy_failed",
            CanonicalStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_statuses() {
        let active: Vec<_> = CanonicalStatus::ALL
            .into_iter()
            .filter(|s| s.class() == StatusClass::Active)
            .collect();
        assert_eq!(
            active,
            vec![
                CanonicalStatus::Planning,
                CanonicalStatus::Applying,
                CanonicalStatus::Destroying
            ]
        );
    }

    #[test]
    fn failures_are_terminal() {
        assert!(CanonicalStatus::PlanFailed.is_terminal());
        assert!(CanonicalStatus::ApplyFailed.is_terminal());
        assert!(CanonicalStatus::DestroyFailed.is_terminal());
        assert!(!CanonicalStatus::Unknown.is_terminal());
    }

    #[test]
    fn display_matches_serde() {
        for status in CanonicalStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
        }
    }
}
