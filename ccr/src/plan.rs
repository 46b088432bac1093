//! Plan observation.
//!
//! The scheduler serves its plan with a status that tracks the plan itself:
//! 200 once complete, 503 while work is in flight. Both carry a plan body, so
//! every reply that passed the tolerated-status check is decoded; only
//! replies whose body is not a plan count as a failed request.

use ccr_common::{ControlPlane, Plan, Result, SpinOptions, Verdict, spin};
use tracing::{debug, info};

/// Message reported while no decodable plan has been seen.
pub const PLAN_FAILURE_MESSAGE: &str = "Request to /plan failed";

/// Cap of the retry counter tracked across one observation.
pub const MAX_TRACKED_RETRIES: u32 = 3;

/// Result of polling the plan endpoint.
#[derive(Debug, Clone)]
pub struct PlanObservation {
    /// Last decoded plan, if any.
    pub plan: Option<Plan>,
    pub converged: bool,
    pub attempts: u32,
    /// Non-matching polls before the predicate first matched, capped at
    /// [`MAX_TRACKED_RETRIES`].
    pub retries: u32,
}

/// Plan that satisfied a wait, with the retries it took.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanMatch {
    pub plan: Plan,
    pub retries: u32,
}

pub struct PlanObserver<'a, C> {
    control_plane: &'a C,
    options: SpinOptions,
}

impl<'a, C: ControlPlane> PlanObserver<'a, C> {
    pub fn new(control_plane: &'a C, options: SpinOptions) -> Self {
        Self {
            control_plane,
            options,
        }
    }

    /// One request; `None` when the body is not a plan or the request failed.
    pub async fn fetch(&self) -> Option<Plan> {
        fetch_plan(self.control_plane).await
    }

    /// Poll until `predicate` accepts a decoded plan.
    ///
    /// With `assert_success` unset the observation comes back on deadline with
    /// `converged == false` and the last decoded plan.
    pub async fn observe<F>(
        &self,
        label: &str,
        assert_success: bool,
        mut predicate: F,
    ) -> Result<PlanObservation>
    where
        F: FnMut(&Plan) -> bool,
    {
        let control_plane = self.control_plane;
        let options = self.options.clone().asserting(assert_success);
        let mut retries = 0u32;
        let mut retries_at_match = 0u32;
        let mut last_plan: Option<Plan> = None;

        let outcome = spin(
            label,
            &options,
            move || async move { fetch_plan(control_plane).await },
            |reply: &Option<Plan>| match reply {
                None => Verdict::pending(PLAN_FAILURE_MESSAGE),
                Some(plan) => {
                    last_plan = Some(plan.clone());
                    if predicate(plan) {
                        retries_at_match = retries;
                        retries = 0;
                        Verdict::new(true, format!("plan status is {}", plan.status))
                    } else {
                        if retries < MAX_TRACKED_RETRIES {
                            retries += 1;
                        }
                        Verdict::pending(format!("plan status is {}", plan.status))
                    }
                }
            },
        )
        .await?;

        Ok(PlanObservation {
            plan: outcome.value.or(last_plan),
            converged: outcome.converged,
            attempts: outcome.attempts,
            retries: if outcome.converged {
                retries_at_match
            } else {
                retries
            },
        })
    }

    /// Poll until `predicate` matches and return the matching plan.
    pub async fn wait_for<F>(&self, label: &str, predicate: F) -> Result<PlanMatch>
    where
        F: FnMut(&Plan) -> bool,
    {
        let observation = self.observe(label, true, predicate).await?;
        Ok(PlanMatch {
            plan: observation.plan.unwrap_or_default(),
            retries: observation.retries,
        })
    }

    /// First decodable plan, whatever its status.
    pub async fn snapshot(&self) -> Result<Plan> {
        Ok(self.wait_for("plan snapshot", |_| true).await?.plan)
    }

    /// Wait for the plan to report `COMPLETE`.
    pub async fn wait_for_complete(&self) -> Result<PlanMatch> {
        let found = self.wait_for("plan complete", Plan::is_complete).await?;
        info!(phases = found.plan.phases.len(), retries = found.retries, "Plan complete");
        Ok(found)
    }

    /// Like [`Self::wait_for_complete`] but returns on deadline instead of
    /// failing.
    pub async fn settle(&self) -> Result<PlanObservation> {
        self.observe("plan settle", false, Plan::is_complete).await
    }

    /// Wait for any sign of new work relative to `baseline`.
    pub async fn wait_for_new_work(&self, baseline: &Plan) -> Result<PlanMatch> {
        let found = self
            .wait_for("plan new work", |plan| plan.activity_since(baseline).any())
            .await?;
        let activity = found.plan.activity_since(baseline);
        info!(
            operation_phase_replaced = activity.operation_phase_replaced,
            phase_count_grew = activity.phase_count_grew,
            in_progress = activity.in_progress,
            retries = found.retries,
            "Plan picked up new work"
        );
        Ok(found)
    }
}

async fn fetch_plan<C: ControlPlane>(control_plane: &C) -> Option<Plan> {
    match control_plane.plan().await {
        Ok(reply) => match Plan::from_json(&reply.body) {
            Ok(plan) => Some(plan),
            Err(e) => {
                debug!(status = reply.status, error = %e, "Plan body not decodable");
                None
            }
        },
        Err(e) => {
            debug!(error = %e, "Plan request failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccr_common::PlanStatus;
    use ccr_common::mock::{MockControlPlane, MockReply, plan};
    use std::time::Duration;

    fn options() -> SpinOptions {
        SpinOptions::new(Duration::from_secs(30), Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_progress_served_with_503_is_decoded() {
        let in_progress = plan(&["r", "d"], PlanStatus::InProgress);
        let body = serde_json::to_string(&in_progress).unwrap();
        let cp = MockControlPlane::new().with_plans([MockReply::status(503, body)]);

        let observer = PlanObserver::new(&cp, options());
        let found = observer.wait_for("in progress", Plan::is_in_progress).await.unwrap();
        assert_eq!(found.plan, in_progress);
        assert_eq!(found.retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_requests_are_retried() {
        let cp = MockControlPlane::new().with_plans([
            MockReply::Transport("connection refused".into()),
            MockReply::status(502, "<html>Bad Gateway</html>"),
            MockReply::status(401, r#"{"code": "unauthorized"}"#),
            MockReply::plan(&plan(&["r", "d"], PlanStatus::Complete)),
        ]);

        let observer = PlanObserver::new(&cp, options());
        let observation = observer.observe("complete", true, Plan::is_complete).await.unwrap();
        assert!(observation.converged);
        assert_eq!(observation.attempts, 4);
        // Failed requests do not count as retries of a decoded plan.
        assert_eq!(observation.retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_status_only_fails_the_attempt() {
        let cp = MockControlPlane::new().with_plans([
            MockReply::status(404, "not found"),
            MockReply::plan(&plan(&["r"], PlanStatus::Complete)),
        ]);

        let observer = PlanObserver::new(&cp, options());
        assert!(observer.wait_for_complete().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_counter_is_capped() {
        let mut replies: Vec<MockReply> = (0..5)
            .map(|_| MockReply::plan(&plan(&["r", "d"], PlanStatus::InProgress)))
            .collect();
        replies.push(MockReply::plan(&plan(&["r", "d"], PlanStatus::Complete)));
        let cp = MockControlPlane::new().with_plans(replies);

        let observer = PlanObserver::new(&cp, options());
        let observation = observer.observe("complete", true, Plan::is_complete).await.unwrap();
        assert_eq!(observation.attempts, 6);
        assert_eq!(observation.retries, MAX_TRACKED_RETRIES);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_plan_failure() {
        let cp = MockControlPlane::new().with_plans([MockReply::Transport("down".into())]);

        let observer = PlanObserver::new(&cp, options());
        let err = observer.wait_for_complete().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains(PLAN_FAILURE_MESSAGE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_returns_last_plan_on_deadline() {
        let stuck = plan(&["r", "d"], PlanStatus::InProgress);
        let cp = MockControlPlane::new().with_plans([MockReply::plan(&stuck)]);

        let observer = PlanObserver::new(&cp, options());
        let observation = observer.settle().await.unwrap();
        assert!(!observation.converged);
        assert_eq!(observation.plan, Some(stuck));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_work_detected_by_replaced_phase() {
        let baseline = plan(&["r", "d-1"], PlanStatus::Complete);
        let cp = MockControlPlane::new().with_plans([
            MockReply::plan(&baseline),
            MockReply::plan(&plan(&["r", "d-2"], PlanStatus::Complete)),
        ]);

        let observer = PlanObserver::new(&cp, options());
        let found = observer.wait_for_new_work(&baseline).await.unwrap();
        assert_eq!(found.plan.phase_id(1), Some("d-2"));
        assert_eq!(found.retries, 1);
    }
}
