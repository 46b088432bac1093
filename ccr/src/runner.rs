//! Suite lifecycle: install, run scenarios in order, uninstall, report.

use crate::harness::Harness;
use crate::scenarios::{ScenarioExecutor, ScenarioReport, ScenarioSpec};
use ccr_common::{
    ChaosError, ControlPlane, PackageManager, RemoteShell, Result, ServiceTask, Verdict, spin,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Lifecycle switches of a suite run.
#[derive(Debug, Clone, Default)]
pub struct SuiteOptions {
    /// Skip uninstall/install before the first scenario.
    pub skip_install: bool,
    /// Leave the service installed after the last scenario.
    pub keep_installed: bool,
}

/// Result of one scenario within a run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    /// Sequencer stage the failure surfaced in, if any.
    pub stage: Option<String>,
    pub error: Option<String>,
    pub report: Option<ScenarioReport>,
}

impl ScenarioOutcome {
    fn from_result(name: &str, result: Result<ScenarioReport>, duration_ms: u64) -> Self {
        match result {
            Ok(report) => Self {
                name: name.to_string(),
                passed: true,
                duration_ms,
                stage: None,
                error: None,
                report: Some(report),
            },
            Err(err) => Self {
                name: name.to_string(),
                passed: false,
                duration_ms,
                stage: match &err {
                    ChaosError::Stage { stage, .. } => Some(stage.to_string()),
                    _ => None,
                },
                error: Some(err.to_string()),
                report: None,
            },
        }
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<ScenarioOutcome>,
}

impl SuiteReport {
    fn start() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            outcomes: Vec::new(),
        }
    }

    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Run {} started {}",
            self.run_id,
            self.started_at.to_rfc3339()
        );
        for outcome in &self.outcomes {
            let secs = outcome.duration_ms as f64 / 1000.0;
            if outcome.passed {
                let _ = writeln!(out, "PASS  {}  ({secs:.1}s)", outcome.name);
            } else {
                let _ = writeln!(
                    out,
                    "FAIL  {}  ({secs:.1}s)  {}",
                    outcome.name,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        let _ = write!(
            out,
            "{} scenarios: {} passed, {} failed",
            self.outcomes.len(),
            self.passed(),
            self.failed()
        );
        out
    }
}

pub struct SuiteRunner<'h, C, S, P> {
    harness: &'h Harness<C, S>,
    packages: &'h P,
}

impl<'h, C, S, P> SuiteRunner<'h, C, S, P>
where
    C: ControlPlane,
    S: RemoteShell,
    P: PackageManager,
{
    pub fn new(harness: &'h Harness<C, S>, packages: &'h P) -> Self {
        Self { harness, packages }
    }

    /// Reinstall the service and wait for it to become healthy.
    pub async fn setup(&self) -> Result<Vec<ServiceTask>> {
        let service = &self.harness.config.service;
        self.uninstall().await;
        self.packages
            .install(&service.package, service.options_file.as_deref())
            .await?;
        self.harness.health().check_health(true).await
    }

    pub async fn teardown(&self) {
        self.uninstall().await;
    }

    /// Uninstall and wait for the service's tasks to go away. Failures are
    /// logged; a missing package is not an error here.
    async fn uninstall(&self) {
        let service = &self.harness.config.service;
        if let Err(e) = self.packages.uninstall(&service.package).await {
            warn!(package = %service.package, error = %e, "Uninstall failed");
            return;
        }

        let control_plane = &self.harness.control_plane;
        let name = service.name.as_str();
        let options = self.harness.spin_options().tolerant();
        let gone = spin(
            "service removal",
            &options,
            move || async move { control_plane.service_tasks(name).await.map(|t| t.len()) },
            |remaining: &Result<usize>| match remaining {
                Ok(0) => Verdict::new(true, "no tasks left"),
                Ok(n) => Verdict::pending(format!("{n} tasks still running")),
                Err(e) => Verdict::pending(format!("task listing failed: {e}")),
            },
        )
        .await;
        if let Ok(outcome) = gone
            && !outcome.converged
        {
            warn!(service = name, message = %outcome.message, "Service not fully removed");
        }
    }

    /// Run `specs` in order. A failing scenario does not stop the run.
    pub async fn run_scenarios(&self, specs: &[ScenarioSpec]) -> Vec<ScenarioOutcome> {
        let executor = ScenarioExecutor::new(self.harness);
        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in specs {
            let start = Instant::now();
            let result = executor.run(spec).await;
            let duration_ms = start.elapsed().as_millis() as u64;
            if let Err(e) = &result {
                error!(scenario = %spec.name, error = %e, "Scenario failed");
            }
            outcomes.push(ScenarioOutcome::from_result(&spec.name, result, duration_ms));
        }
        outcomes
    }

    /// Full run: setup, every scenario, teardown.
    pub async fn run(&self, specs: &[ScenarioSpec], options: &SuiteOptions) -> Result<SuiteReport> {
        let mut report = SuiteReport::start();
        info!(run_id = %report.run_id, scenarios = specs.len(), "Starting suite");

        if !options.skip_install {
            self.setup().await?;
        }
        report.outcomes = self.run_scenarios(specs).await;
        if !options.keep_installed {
            self.teardown().await;
        }

        report.finished_at = Utc::now();
        info!(
            run_id = %report.run_id,
            passed = report.passed(),
            failed = report.failed(),
            "Suite finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::find;
    use ccr_common::ChaosConfig;
    use ccr_common::mock::{
        MockControlPlane, MockPackages, MockShell, PackageCall, running_tasks,
    };
    use std::time::Duration;

    fn config() -> ChaosConfig {
        let mut config = ChaosConfig::default();
        config.timing.wait_budget = Duration::from_secs(10);
        config
    }

    fn healthy() -> Vec<ServiceTask> {
        running_tasks(&["10.0.0.1", "10.0.0.2", "10.0.0.3"])
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_reinstalls_and_waits_for_health() {
        let cp = MockControlPlane::new().with_tasks("cassandra", [Vec::new(), healthy()]);
        let harness = Harness::new(cp, MockShell::new(), config());
        let packages = MockPackages::new();
        let runner = SuiteRunner::new(&harness, &packages);

        let tasks = runner.setup().await.unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(
            packages.calls(),
            vec![
                PackageCall::Uninstall("cassandra".into()),
                PackageCall::Install {
                    package: "cassandra".into(),
                    options_file: None
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_failure_aborts_run() {
        let cp = MockControlPlane::new();
        let harness = Harness::new(cp, MockShell::new(), config());
        let packages = MockPackages::new().failing_install("package not found");
        let runner = SuiteRunner::new(&harness, &packages);

        let specs = vec![find("scheduler_died").unwrap()];
        let err = runner.run(&specs, &SuiteOptions::default()).await.unwrap_err();
        assert!(matches!(err, ChaosError::Cli { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_scenario_does_not_stop_the_run() {
        let mut marathon = running_tasks(&["10.0.0.9"]);
        marathon[0].name = "cassandra".into();
        let cp = MockControlPlane::new()
            .with_tasks("cassandra", [healthy()])
            .with_tasks("marathon", [marathon]);
        let shell = MockShell::new().fail_when("CassandraDaemon", 1, "no process");
        let harness = Harness::new(cp, shell, config());
        let packages = MockPackages::new();
        let runner = SuiteRunner::new(&harness, &packages);

        let specs = vec![
            find("kill_task_in_node").unwrap(),
            find("scheduler_died").unwrap(),
        ];
        let options = SuiteOptions {
            skip_install: true,
            keep_installed: true,
        };
        let report = runner.run(&specs, &options).await.unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert!(!report.outcomes[0].passed);
        assert_eq!(report.outcomes[0].stage.as_deref(), Some("failure"));
        assert!(report.outcomes[1].passed);
        assert!(packages.calls().is_empty());

        let text = report.render_text();
        assert!(text.contains("FAIL  kill_task_in_node"));
        assert!(text.contains("PASS  scheduler_died"));
        assert!(text.ends_with("2 scenarios: 1 passed, 1 failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_serializes() {
        let cp = MockControlPlane::new();
        let harness = Harness::new(cp, MockShell::new(), config());
        let packages = MockPackages::new();
        let runner = SuiteRunner::new(&harness, &packages);

        let options = SuiteOptions {
            skip_install: true,
            keep_installed: false,
        };
        let report = runner.run(&[], &options).await.unwrap();
        assert!(report.all_passed());
        assert_eq!(packages.calls(), vec![PackageCall::Uninstall("cassandra".into())]);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["run_id"], report.run_id.to_string());
        assert!(json["outcomes"].as_array().unwrap().is_empty());
    }
}
