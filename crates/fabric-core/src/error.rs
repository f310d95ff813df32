//! ---
//! fabric_section: "01-core-functionality"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Error types of the recovery and fault injection surfaces."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use fabric_health::HealthError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryError {
    #[error("router {0} is not managed by the recovery orchestrator")]
    UnknownRouter(String),
    #[error("recovery of router {0} is already in progress")]
    InProgress(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error(
        "unknown command '{0}'; expected one of: fail, recover, status, kill-daemon, detach, \
         attach, fail-both"
    )]
    UnknownCommand(String),
    #[error("command '{command}' requires {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("command '{command}' takes {expected} argument(s), got {got}")]
    TooManyArguments {
        command: &'static str,
        expected: usize,
        got: usize,
    },
}

#[derive(Debug, Error)]
pub enum FacadeError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Health(#[from] HealthError),
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
    #[error("element {0} is not a router")]
    NotARouter(String),
    #[error("element {0} is not a switch")]
    NotASwitch(String),
    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{action} on {target} failed: {message}")]
    Collaborator {
        action: &'static str,
        target: String,
        message: String,
    },
}

impl FacadeError {
    /// Whether the caller sent something invalid, as opposed to the fabric failing.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            FacadeError::Collaborator { .. } | FacadeError::Encode(_)
        )
    }
}
