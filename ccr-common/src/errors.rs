//! Error type shared by the chaos suite.
//!
//! Errors fall into three classes:
//!
//! | Class        | Variants                                     | Handling                          |
//! |--------------|----------------------------------------------|-----------------------------------|
//! | Transient    | `Authentication`, `Transport`, `UnexpectedStatus` (5xx) | swallowed inside polls  |
//! | Operational  | `CommandFailed`, `Cli`                       | raised immediately                |
//! | Convergence  | `Timeout`, `Stage`                           | scenario failure                  |

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the suite.
pub type Result<T, E = ChaosError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ChaosError {
    /// A convergence poll hit its deadline.
    #[error("{label} did not converge within {waited:?}: {message}")]
    Timeout {
        label: String,
        waited: Duration,
        message: String,
    },

    /// A remote command reported failure.
    #[error("Failed to {action} on {host}: exit={exit_code} stderr={stderr}")]
    CommandFailed {
        action: String,
        host: String,
        exit_code: i32,
        stderr: String,
    },

    /// The control plane answered with a status outside the tolerated set.
    #[error("Unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    /// Credentials were rejected or could not be obtained.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Connection-level failure (refused, reset, timed out, SSH session lost).
    #[error("Transport error: {0}")]
    Transport(String),

    /// A response body could not be decoded.
    #[error("Failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The cluster CLI failed.
    #[error("Cluster CLI `{command}` failed: {message}")]
    Cli { command: String, message: String },

    /// A sequencer stage failed.
    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<ChaosError>,
    },
}

impl ChaosError {
    pub fn decode(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap this error with the sequencer stage it surfaced in.
    pub fn in_stage(self, stage: &'static str) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Whether a poll should treat this error as "not converged yet".
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Authentication(_) | Self::Transport(_) => true,
            Self::UnexpectedStatus { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Stage { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ChaosError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode("JSON document", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_names_action_and_host() {
        let err = ChaosError::CommandFailed {
            action: "kill task with pattern \"CassandraDaemon\"".into(),
            host: "10.0.1.5".into(),
            exit_code: 1,
            stderr: "usage: kill".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("CassandraDaemon"));
        assert!(msg.contains("10.0.1.5"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(ChaosError::Authentication("expired".into()).is_transient());
        assert!(ChaosError::Transport("reset".into()).is_transient());
        assert!(
            ChaosError::UnexpectedStatus {
                status: 504,
                url: "x".into()
            }
            .is_transient()
        );
        assert!(
            !ChaosError::UnexpectedStatus {
                status: 404,
                url: "x".into()
            }
            .is_transient()
        );
        assert!(!ChaosError::Config("bad".into()).is_transient());
    }

    #[test]
    fn test_stage_wrapping_keeps_timeout_classification() {
        let err = ChaosError::Timeout {
            label: "plan".into(),
            waited: Duration::from_secs(300),
            message: "Request to /plan failed".into(),
        }
        .in_stage("settle");

        assert!(err.is_timeout());
        let msg = err.to_string();
        assert!(msg.contains("settle"));
        assert!(msg.contains("Request to /plan failed"));
    }
}
