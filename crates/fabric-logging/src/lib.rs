//! ---
//! fabric_section: "03-logging"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Structured logging context and operator event helpers."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Logging context shared by operator-facing code paths.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a compact stderr subscriber for command-line tools.
///
/// The daemon installs its own subscriber through `fabric_common::logging`.
pub fn init() {
    let filter = EnvFilter::try_from_env("FABRIC_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::WARN.into()));
    let _ = Registry::default()
        .with(filter)
        .with(
            subscriber_fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init();
}

/// Structured fields attached to events emitted through the helper macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Protection domain the event concerns.
    pub domain: Option<&'a str>,
    /// Monitored element the event concerns.
    pub element: Option<&'a str>,
    /// Router whose routing daemon the event concerns.
    pub router: Option<&'a str>,
    /// Who asked for the action (`api`, `cli`, `scenario`, `runtime`).
    pub origin: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a protection domain.
    pub fn with_domain(mut self, domain: &'a str) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Attach an element identifier.
    pub fn with_element(mut self, element: &'a str) -> Self {
        self.element = Some(element);
        self
    }

    /// Attach a router identifier.
    pub fn with_router(mut self, router: &'a str) -> Self {
        self.router = Some(router);
        self
    }

    /// Attach the originator of an operator action.
    pub fn with_origin(mut self, origin: &'a str) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Outcome of an operator-visible action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The action completed.
    Success,
    /// The action completed but left the fabric degraded.
    Degraded,
    /// The action failed.
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Degraded => "degraded",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized operator event tagged with its outcome.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let empty = LogContext::default();
    let ctx = context.unwrap_or(&empty);
    match outcome {
        SystemEventOutcome::Success => {
            crate::__fabric_event!(Level::INFO, ctx, [event = event, outcome = outcome.as_str()], "{}", message)
        }
        SystemEventOutcome::Degraded => {
            crate::__fabric_event!(Level::WARN, ctx, [event = event, outcome = outcome.as_str()], "{}", message)
        }
        SystemEventOutcome::Fault => {
            crate::__fabric_event!(Level::ERROR, ctx, [event = event, outcome = outcome.as_str()], "{}", message)
        }
    }
}
