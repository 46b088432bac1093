//! Planned operations: operation, fault and recovery run against a live plan.
//!
//! A planned operation goes through four stages, strictly in order:
//!
//! 1. baseline: snapshot the current plan
//! 2. trigger: run the operation, then wait for the plan to show new work
//! 3. fault and recovery: run the failure callback, then the recovery callback
//! 4. settle: wait for the plan to report `COMPLETE`
//!
//! An error in any stage stops the sequence and comes back wrapped in
//! [`ChaosError::Stage`] naming where it happened.

use crate::plan::PlanObserver;
use ccr_common::{ChaosError, ControlPlane, Plan, PlanActivity, Result};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Future returned by a stage callback.
pub type StageFuture<'a> = LocalBoxFuture<'a, Result<()>>;

/// A one-shot stage callback.
pub type StageFn<'a> = Box<dyn FnOnce() -> StageFuture<'a> + 'a>;

/// Box an async closure as a [`StageFn`].
pub fn stage<'a, F, Fut>(f: F) -> StageFn<'a>
where
    F: FnOnce() -> Fut + 'a,
    Fut: Future<Output = Result<()>> + 'a,
{
    Box::new(move || f().boxed_local())
}

/// A stage that does nothing.
pub fn no_op<'a>() -> StageFn<'a> {
    stage(|| async { Ok(()) })
}

/// Stage names as they appear in errors and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Baseline,
    Trigger,
    Failure,
    Recovery,
    Settle,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Trigger => "trigger",
            Self::Failure => "failure",
            Self::Recovery => "recovery",
            Self::Settle => "settle",
        }
    }
}

/// Operation, failure and recovery callbacks of one planned scenario.
pub struct PlannedOperation<'a> {
    pub name: String,
    pub operation: StageFn<'a>,
    pub failure: StageFn<'a>,
    pub recovery: StageFn<'a>,
}

impl<'a> PlannedOperation<'a> {
    /// Planned operation with no-op failure and recovery.
    pub fn new(name: impl Into<String>, operation: StageFn<'a>) -> Self {
        Self {
            name: name.into(),
            operation,
            failure: no_op(),
            recovery: no_op(),
        }
    }

    pub fn with_failure(mut self, failure: StageFn<'a>) -> Self {
        self.failure = failure;
        self
    }

    pub fn with_recovery(mut self, recovery: StageFn<'a>) -> Self {
        self.recovery = recovery;
        self
    }
}

/// What a completed sequence observed.
#[derive(Debug, Clone, Serialize)]
pub struct SequenceReport {
    pub name: String,
    pub baseline: Plan,
    /// First plan that showed new work after the operation.
    pub triggered: Plan,
    pub activity: PlanActivity,
    pub settled: Plan,
    /// Non-matching plan polls while waiting for new work, capped.
    pub trigger_retries: u32,
    /// Non-matching plan polls while waiting for completion, capped.
    pub settle_retries: u32,
    pub duration: Duration,
}

pub struct OperationSequencer<'a, C> {
    plans: PlanObserver<'a, C>,
}

impl<'a, C: ControlPlane> OperationSequencer<'a, C> {
    pub fn new(plans: PlanObserver<'a, C>) -> Self {
        Self { plans }
    }

    pub async fn run(&self, planned: PlannedOperation<'_>) -> Result<SequenceReport> {
        let start = Instant::now();
        let PlannedOperation {
            name,
            operation,
            failure,
            recovery,
        } = planned;

        let baseline = self.plans.snapshot().await.map_err(at(Stage::Baseline))?;
        info!(scenario = %name, phases = baseline.phases.len(), status = %baseline.status, "Running planned operation");

        operation().await.map_err(at(Stage::Trigger))?;
        let triggered = self
            .plans
            .wait_for_new_work(&baseline)
            .await
            .map_err(at(Stage::Trigger))?;
        let activity = triggered.plan.activity_since(&baseline);

        info!(scenario = %name, "Running failure operation");
        failure().await.map_err(at(Stage::Failure))?;
        info!(scenario = %name, "Running recovery operation");
        recovery().await.map_err(at(Stage::Recovery))?;

        info!(scenario = %name, "Verifying plan after failure");
        let settled = self
            .plans
            .wait_for_complete()
            .await
            .map_err(at(Stage::Settle))?;

        Ok(SequenceReport {
            name,
            baseline,
            triggered: triggered.plan,
            activity,
            settled: settled.plan,
            trigger_retries: triggered.retries,
            settle_retries: settled.retries,
            duration: start.elapsed(),
        })
    }
}

fn at(stage: Stage) -> impl FnOnce(ChaosError) -> ChaosError {
    move |err| err.in_stage(stage.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccr_common::mock::{MockControlPlane, MockReply, plan};
    use ccr_common::{PlanStatus, SpinOptions};
    use std::cell::RefCell;

    fn options() -> SpinOptions {
        SpinOptions::new(Duration::from_secs(30), Duration::from_secs(1))
    }

    fn record<'a>(log: &'a RefCell<Vec<&'static str>>, entry: &'static str) -> StageFn<'a> {
        stage(move || async move {
            log.borrow_mut().push(entry);
            Ok(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_stages_run_in_order() {
        let cp = MockControlPlane::new().with_plans([
            MockReply::plan(&plan(&["r", "d-1"], PlanStatus::Complete)),
            MockReply::plan(&plan(&["r", "d-2"], PlanStatus::InProgress)),
            MockReply::plan(&plan(&["r", "d-2"], PlanStatus::Complete)),
        ]);
        let log = RefCell::new(Vec::new());
        let sequencer = OperationSequencer::new(PlanObserver::new(&cp, options()));

        let planned = PlannedOperation::new("ordered", record(&log, "operation"))
            .with_failure(record(&log, "failure"))
            .with_recovery(record(&log, "recovery"));
        let report = sequencer.run(planned).await.unwrap();

        assert_eq!(*log.borrow(), vec!["operation", "failure", "recovery"]);
        assert_eq!(report.baseline.phase_id(1), Some("d-1"));
        assert!(report.activity.operation_phase_replaced);
        assert!(report.activity.in_progress);
        assert!(report.settled.is_complete());
        assert_eq!(report.trigger_retries, 0);
        assert_eq!(report.settle_retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_carries_plan_retries() {
        let cp = MockControlPlane::new().with_plans([
            MockReply::plan(&plan(&["r", "d-1"], PlanStatus::Complete)),
            MockReply::plan(&plan(&["r", "d-1"], PlanStatus::Complete)),
            MockReply::plan(&plan(&["r", "d-1"], PlanStatus::Complete)),
            MockReply::plan(&plan(&["r", "d-2"], PlanStatus::InProgress)),
            MockReply::plan(&plan(&["r", "d-2"], PlanStatus::InProgress)),
            MockReply::plan(&plan(&["r", "d-2"], PlanStatus::Complete)),
        ]);
        let sequencer = OperationSequencer::new(PlanObserver::new(&cp, options()));

        let report = sequencer
            .run(PlannedOperation::new("slow", no_op()))
            .await
            .unwrap();
        assert_eq!(report.trigger_retries, 2);
        assert_eq!(report.settle_retries, 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["trigger_retries"], 2);
        assert_eq!(json["settle_retries"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_defaults_are_no_ops() {
        let cp = MockControlPlane::new().with_plans([
            MockReply::plan(&plan(&["r", "d-1"], PlanStatus::Complete)),
            MockReply::plan(&plan(&["r", "d-1", "c-1"], PlanStatus::Complete)),
        ]);
        let sequencer = OperationSequencer::new(PlanObserver::new(&cp, options()));

        let report = sequencer
            .run(PlannedOperation::new("bare", no_op()))
            .await
            .unwrap();
        assert!(report.activity.phase_count_grew);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_new_work_fails_in_trigger() {
        let cp = MockControlPlane::new()
            .with_plans([MockReply::plan(&plan(&["r", "d-1"], PlanStatus::Complete))]);
        let log = RefCell::new(Vec::new());
        let sequencer = OperationSequencer::new(PlanObserver::new(&cp, options()));

        let planned = PlannedOperation::new("stuck", no_op()).with_failure(record(&log, "failure"));
        let err = sequencer.run(planned).await.unwrap_err();

        assert!(matches!(err, ChaosError::Stage { stage: "trigger", .. }));
        assert!(err.is_timeout());
        assert!(log.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_error_skips_recovery() {
        let cp = MockControlPlane::new().with_plans([
            MockReply::plan(&plan(&["r", "d-1"], PlanStatus::Complete)),
            MockReply::plan(&plan(&["r", "d-1"], PlanStatus::InProgress)),
        ]);
        let log = RefCell::new(Vec::new());
        let sequencer = OperationSequencer::new(PlanObserver::new(&cp, options()));

        let planned = PlannedOperation::new("broken", no_op())
            .with_failure(stage(|| async {
                Err(ChaosError::CommandFailed {
                    action: "kill task".into(),
                    host: "10.0.0.1".into(),
                    exit_code: 1,
                    stderr: String::new(),
                })
            }))
            .with_recovery(record(&log, "recovery"));
        let err = sequencer.run(planned).await.unwrap_err();

        assert!(matches!(err, ChaosError::Stage { stage: "failure", .. }));
        assert!(log.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_never_completing_fails_in_settle() {
        let cp = MockControlPlane::new().with_plans([
            MockReply::plan(&plan(&["r", "d-1"], PlanStatus::Complete)),
            MockReply::plan(&plan(&["r", "d-2"], PlanStatus::Error)),
        ]);
        let sequencer = OperationSequencer::new(PlanObserver::new(&cp, options()));

        let err = sequencer
            .run(PlannedOperation::new("never", no_op()))
            .await
            .unwrap_err();
        assert!(matches!(err, ChaosError::Stage { stage: "settle", .. }));
    }
}
