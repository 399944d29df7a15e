//! Canonical status derivation.
//!
//! A pure function of the request facts and the attempt ledger. Rules are
//! evaluated most advanced stage first: a destroy or apply attempt implies
//! the earlier stages already succeeded, so it decides the status even when
//! plan facts are missing.
//!
//! | Evidence                                   | Status             |
//! |--------------------------------------------|--------------------|
//! | destroy attempt in progress/success/failed | destroying/destroyed/destroy_failed |
//! | apply attempt in progress/success/failed   | applying/applied/apply_failed |
//! | merge SHA, no apply or destroy attempt     | merged             |
//! | no plan attempt, no pull request           | created            |
//! | plan in progress                           | planning           |
//! | plan failed                                | plan_failed        |
//! | plan succeeded, run approved / not         | approved / plan_ready |
//! | anything else                              | unknown            |

use crate::ledger::{Attempt, AttemptLedger, Stage};
use crate::types::RequestFacts;

use super::status::CanonicalStatus;

/// Derives the canonical status. Total: every input maps to one status.
pub fn derive_status(facts: &RequestFacts<'_>, ledger: &AttemptLedger) -> CanonicalStatus {
    if let Some(destroy) = ledger.current_attempt_strict(Stage::Destroy) {
        return from_attempt(
            destroy,
            CanonicalStatus::Destroying,
            CanonicalStatus::Destroyed,
            CanonicalStatus::DestroyFailed,
        );
    }

    if let Some(apply) = ledger.current_attempt_strict(Stage::Apply) {
        return from_attempt(
            apply,
            CanonicalStatus::Applying,
            CanonicalStatus::Applied,
            CanonicalStatus::ApplyFailed,
        );
    }

    if facts.merge_sha.is_some() {
        return CanonicalStatus::Merged;
    }

    let Some(plan) = ledger.current_attempt_strict(Stage::Plan) else {
        return if facts.pr.is_none() {
            CanonicalStatus::Created
        } else {
            CanonicalStatus::Unknown
        };
    };

    if plan.is_in_progress() {
        CanonicalStatus::Planning
    } else if plan.failed() {
        CanonicalStatus::PlanFailed
    } else if plan.succeeded() {
        if facts.approved {
            CanonicalStatus::Approved
        } else {
            CanonicalStatus::PlanReady
        }
    } else {
        CanonicalStatus::Unknown
    }
}

fn from_attempt(
    attempt: &Attempt,
    in_progress: CanonicalStatus,
    succeeded: CanonicalStatus,
    failed: CanonicalStatus,
) -> CanonicalStatus {
    if attempt.is_in_progress() {
        in_progress
    } else if attempt.succeeded() {
        succeeded
    } else if attempt.failed() {
        failed
    } else {
        CanonicalStatus::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{AttemptUpdate, Conclusion, RunStatus};
    use crate::test_utils::{arb_attempt_update, at_minute};
    use crate::types::{PrNumber, Sha};
    use proptest::prelude::*;

    fn facts(pr: Option<u64>, merge_sha: Option<&Sha>) -> RequestFacts<'_> {
        RequestFacts {
            pr: pr.map(PrNumber),
            merge_sha,
            approved: false,
        }
    }

    fn ledger_with(updates: &[AttemptUpdate]) -> AttemptLedger {
        let mut ledger = AttemptLedger::new();
        for update in updates {
            ledger.record_attempt(update.clone()).unwrap();
        }
        ledger
    }

    fn done(stage: Stage, run: u64, conclusion: Conclusion) -> AttemptUpdate {
        AttemptUpdate::new(stage, at_minute(run as i64))
            .run_id(run)
            .status(RunStatus::Completed)
            .conclusion(conclusion)
    }

    fn running(stage: Stage, run: u64) -> AttemptUpdate {
        AttemptUpdate::new(stage, at_minute(run as i64))
            .run_id(run)
            .status(RunStatus::InProgress)
    }

    #[test]
    fn nothing_known_is_created() {
        assert_eq!(
            derive_status(&facts(None, None), &AttemptLedger::new()),
            CanonicalStatus::Created
        );
    }

    #[test]
    fn pull_request_without_plan_is_unknown() {
        assert_eq!(
            derive_status(&facts(Some(3), None), &AttemptLedger::new()),
            CanonicalStatus::Unknown
        );
    }

    #[test]
    fn plan_progression() {
        let ledger = ledger_with(&[running(Stage::Plan, 1)]);
        assert_eq!(derive_status(&facts(Some(3), None), &ledger), CanonicalStatus::Planning);

        let ledger = ledger_with(&[done(Stage::Plan, 1, Conclusion::Failure)]);
        assert_eq!(derive_status(&facts(Some(3), None), &ledger), CanonicalStatus::PlanFailed);

        let ledger = ledger_with(&[done(Stage::Plan, 1, Conclusion::Success)]);
        assert_eq!(derive_status(&facts(Some(3), None), &ledger), CanonicalStatus::PlanReady);
    }

    #[test]
    fn approval_after_successful_plan() {
        let ledger = ledger_with(&[done(Stage::Plan, 1, Conclusion::Success)]);
        let mut f = facts(Some(3), None);
        f.approved = true;
        assert_eq!(derive_status(&f, &ledger), CanonicalStatus::Approved);
    }

    #[test]
    fn merged_without_apply_or_destroy() {
        let sha = Sha::new("deadbeef");
        let ledger = ledger_with(&[done(Stage::Plan, 1, Conclusion::Success)]);
        assert_eq!(
            derive_status(&facts(Some(3), Some(&sha)), &ledger),
            CanonicalStatus::Merged
        );
    }

    #[test]
    fn apply_progression() {
        let sha = Sha::new("deadbeef");
        let f = facts(Some(3), Some(&sha));
        let plan = done(Stage::Plan, 1, Conclusion::Success);

        let ledger = ledger_with(&[plan.clone(), running(Stage::Apply, 2)]);
        assert_eq!(derive_status(&f, &ledger), CanonicalStatus::Applying);

        let ledger = ledger_with(&[plan.clone(), done(Stage::Apply, 2, Conclusion::Success)]);
        assert_eq!(derive_status(&f, &ledger), CanonicalStatus::Applied);

        let ledger = ledger_with(&[plan, done(Stage::Apply, 2, Conclusion::Cancelled)]);
        assert_eq!(derive_status(&f, &ledger), CanonicalStatus::ApplyFailed);
    }

    #[test]
    fn destroy_wins_over_apply() {
        let ledger = ledger_with(&[
            done(Stage::Plan, 1, Conclusion::Success),
            done(Stage::Apply, 2, Conclusion::Success),
            running(Stage::Destroy, 3),
        ]);
        assert_eq!(derive_status(&facts(Some(3), None), &ledger), CanonicalStatus::Destroying);

        let ledger = ledger_with(&[
            done(Stage::Apply, 2, Conclusion::Success),
            done(Stage::Destroy, 3, Conclusion::Success),
        ]);
        assert_eq!(derive_status(&facts(None, None), &ledger), CanonicalStatus::Destroyed);

        let ledger = ledger_with(&[done(Stage::Destroy, 3, Conclusion::Failure)]);
        assert_eq!(
            derive_status(&facts(None, None), &ledger),
            CanonicalStatus::DestroyFailed
        );
    }

    #[test]
    fn neutral_conclusion_is_unknown() {
        let ledger = ledger_with(&[done(Stage::Apply, 2, Conclusion::Neutral)]);
        assert_eq!(derive_status(&facts(Some(3), None), &ledger), CanonicalStatus::Unknown);
    }

    #[test]
    fn blank_attempt_is_unknown() {
        let mut ledger = AttemptLedger::new();
        ledger
            .record_attempt(AttemptUpdate::new(Stage::Plan, at_minute(0)))
            .unwrap();
        assert_eq!(derive_status(&facts(None, None), &ledger), CanonicalStatus::Unknown);
    }

    proptest! {
        /// Property: derivation is pure and survives a serde roundtrip of the
        /// ledger unchanged.
        #[test]
        fn derivation_survives_serde_roundtrip(
            updates in prop::collection::vec(arb_attempt_update(), 0..30),
            pr in prop::option::of(1u64..1000),
            merged in any::<bool>(),
            approved in any::<bool>()
        ) {
            let mut ledger = AttemptLedger::new();
            for update in updates {
                let _ = ledger.record_attempt(update);
            }
            let sha = Sha::new("0123456789abcdef0123456789abcdef01234567");
            let f = RequestFacts {
                pr: pr.map(PrNumber),
                merge_sha: merged.then_some(&sha),
                approved,
            };

            let before = derive_status(&f, &ledger);
            let json = serde_json::to_string(&ledger).unwrap();
            let parsed: AttemptLedger = serde_json::from_str(&json).unwrap();

            prop_assert_eq!(before, derive_status(&f, &parsed));
            prop_assert_eq!(before, derive_status(&f, &ledger));
        }
    }
}
