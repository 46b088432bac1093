//! Cassandra recovery chaos suite.
//!
//! Drives a live cluster through faults while the Cassandra scheduler works
//! on a plan, then checks that the plan completes and the service comes back
//! healthy.

pub mod control_plane;
pub mod dcos_cli;
pub mod fault;
pub mod harness;
pub mod health;
pub mod operations;
pub mod plan;
pub mod recovery;
pub mod runner;
pub mod scenarios;
pub mod sequencer;
#[cfg(unix)]
pub mod ssh;

pub use control_plane::HttpControlPlane;
pub use dcos_cli::DcosCli;
pub use fault::{FaultInjector, PartitionDirection};
pub use harness::Harness;
pub use health::HealthProber;
pub use operations::Operations;
pub use plan::{PlanMatch, PlanObservation, PlanObserver};
pub use recovery::Recovery;
pub use runner::{ScenarioOutcome, SuiteOptions, SuiteReport, SuiteRunner};
pub use scenarios::{ScenarioExecutor, ScenarioReport, ScenarioSpec, catalog};
pub use sequencer::{OperationSequencer, PlannedOperation, SequenceReport, StageFn, stage};
#[cfg(unix)]
pub use ssh::{SshShell, SshOptions};
