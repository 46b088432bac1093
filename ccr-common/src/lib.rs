//! Shared building blocks for the Cassandra recovery chaos suite.
//!
//! - [`poll`]: the deadline-bounded convergence poller every assertion uses
//! - [`cluster`]: contracts for the control plane, remote shell and package CLI
//! - [`types`]: plan documents, service tasks, command results
//! - [`http`]: status codes tolerated from the control plane
//! - `mock`: scripted collaborators for tests (feature `mock`)

pub mod cluster;
pub mod config;
pub mod errors;
pub mod http;
pub mod logging;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod poll;
pub mod testing;
pub mod types;

pub use cluster::{ControlPlane, PackageManager, RemoteShell};
pub use config::{ChaosConfig, ConfigError};
pub use errors::{ChaosError, Result};
pub use http::request_success;
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use poll::{SpinOptions, SpinOutcome, Verdict, spin};
pub use types::{
    CommandResult, HostSet, HttpReply, OPERATION_PHASE_INDEX, Phase, Plan, PlanActivity,
    PlanStatus, ServiceTask, Step, TASK_RUNNING_STATE,
};
