//! Common types used across CCR components.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Index of the operation phase inside a service plan.
///
/// Phase 0 is reconciliation; the phase that carries configuration updates,
/// cleanup and repair work sits right after it.
pub const OPERATION_PHASE_INDEX: usize = 1;

/// Task state reported by the orchestration master for a live task.
pub const TASK_RUNNING_STATE: &str = "TASK_RUNNING";

/// Set of hosts currently running a service's tasks.
///
/// Ordered so that picking "one node" is deterministic between runs.
pub type HostSet = BTreeSet<String>;

/// Status of a plan, phase or step as reported by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Pending,
    Waiting,
    InProgress,
    Complete,
    Error,
    /// Any status this client does not know about.
    #[serde(other)]
    Unknown,
}

impl Default for PlanStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Waiting => "WAITING",
            Self::InProgress => "IN_PROGRESS",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// A single step inside a plan phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: PlanStatus,
    #[serde(default)]
    pub message: String,
}

/// A named stage of a plan. Identity is the `id`, not the position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub status: PlanStatus,
}

/// Recovery/deployment plan exposed by the scheduler at `/v1/plan`.
///
/// `phases` and `status` are required so that error bodies served with a
/// tolerated status never decode as an empty plan.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Plan {
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub status: PlanStatus,
}

impl Plan {
    /// Decode a plan from a response body.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    /// Identifier of the phase at `index`, if the plan has that many phases.
    pub fn phase_id(&self, index: usize) -> Option<&str> {
        self.phases.get(index).map(|p| p.id.as_str())
    }

    pub fn is_complete(&self) -> bool {
        self.status == PlanStatus::Complete
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == PlanStatus::InProgress
    }

    /// Which of the "new recovery work" signals this plan shows relative to
    /// `baseline`.
    pub fn activity_since(&self, baseline: &Plan) -> PlanActivity {
        PlanActivity {
            operation_phase_replaced: baseline.phase_id(OPERATION_PHASE_INDEX)
                != self.phase_id(OPERATION_PHASE_INDEX),
            phase_count_grew: baseline.phases.len() < self.phases.len(),
            in_progress: self.is_in_progress(),
        }
    }
}

/// Signals that a plan has started new work compared to a baseline snapshot.
///
/// Any single signal is accepted as evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PlanActivity {
    pub operation_phase_replaced: bool,
    pub phase_count_grew: bool,
    pub in_progress: bool,
}

impl PlanActivity {
    pub fn any(&self) -> bool {
        self.operation_phase_replaced || self.phase_count_grew || self.in_progress
    }
}

/// A task of the service under test, as reported by the orchestration master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTask {
    pub id: String,
    pub name: String,
    pub state: String,
    /// Host of the agent running the task.
    pub host: String,
}

impl ServiceTask {
    pub fn is_running(&self) -> bool {
        self.state == TASK_RUNNING_STATE
    }
}

/// Result of a command executed on a cluster node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Raw HTTP reply from the control plane: status plus undecoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}
