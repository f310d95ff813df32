//! ---
//! fabric_section: "04-routing-snapshots"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Snapshot capture errors."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SnapshotError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("router '{0}' has no snapshot slot")]
    UnknownRouter(String),
    #[error("a capture for router '{0}' is already in flight")]
    CaptureInProgress(String),
    #[error("rib query for router '{router}' failed: {message}")]
    Query { router: String, message: String },
}
