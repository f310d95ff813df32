//! ---
//! fabric_section: "01-core-functionality"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Failover runtime, recovery orchestration, and fault injection."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
//! Failover runtime wiring, per-router recovery, and the operator fault injection facade.

pub mod board;
pub mod command;
pub mod error;
pub mod facade;
pub mod recovery;
pub mod runtime;

pub use board::DecisionBoard;
pub use command::AdminCommand;
pub use error::{CommandError, FacadeError, RecoveryError};
pub use facade::{
    ElementStatus, FaultInjectionFacade, RecoveryAttempt, RecoverySummary, StatusReport,
};
pub use recovery::{
    RecoveryOrchestrator, RecoveryOutcome, RecoveryReport, RecoverySettings, RouterPhase,
    RouterStatus,
};
pub use runtime::{Collaborators, FabricRuntime, RuntimeHandle};
