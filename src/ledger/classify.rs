//! Workflow run classification.
//!
//! The provider may run unrelated workflows in the same repository, so a run
//! whose name matches no stage keyword is unclassified and dropped by the
//! caller rather than treated as an error.

use serde::{Deserialize, Serialize};

use super::attempt::Stage;

/// Pipeline stage tag derived from a workflow run name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Plan,
    Apply,
    Destroy,
    Cleanup,
}

impl WorkflowKind {
    /// Keyword match order. The first keyword found in the name wins, so a
    /// run named "plan and apply" is an apply run.
    pub const PRIORITY: [WorkflowKind; 4] = [
        WorkflowKind::Destroy,
        WorkflowKind::Cleanup,
        WorkflowKind::Apply,
        WorkflowKind::Plan,
    ];

    pub fn keyword(&self) -> &'static str {
        match self {
            WorkflowKind::Plan => "plan",
            WorkflowKind::Apply => "apply",
            WorkflowKind::Destroy => "destroy",
            WorkflowKind::Cleanup => "cleanup",
        }
    }

    /// The ledger stage this kind records into. Cleanup runs have none.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            WorkflowKind::Plan => Some(Stage::Plan),
            WorkflowKind::Apply => Some(Stage::Apply),
            WorkflowKind::Destroy => Some(Stage::Destroy),
            WorkflowKind::Cleanup => None,
        }
    }
}

/// Classifies a workflow run name by case-insensitive keyword match.
///
/// # Examples
///
/// ```
/// use tf_lifecycle::ledger::{WorkflowKind, classify_workflow_run};
///
/// assert_eq!(classify_workflow_run("Terraform PLAN (prod)"), Some(WorkflowKind::Plan));
/// assert_eq!(classify_workflow_run("plan + apply"), Some(WorkflowKind::Apply));
/// assert_eq!(classify_workflow_run("lint"), None);
/// ```
pub fn classify_workflow_run(name: &str) -> Option<WorkflowKind> {
    let lower = name.to_lowercase();
    WorkflowKind::PRIORITY
        .into_iter()
        .find(|kind| lower.contains(kind.keyword()))
}
