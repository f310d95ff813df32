//! ---
//! fabric_section: "07-admin-api"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "Admin HTTP API over the fault injection facade."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---

pub mod client;

use std::fmt;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fabric_common::config::Mode;
use fabric_core::{
    AdminCommand, CommandError, ElementStatus, FacadeError, FaultInjectionFacade,
    RecoveryError, RecoverySummary, StatusReport,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub use client::ApiClient;

const LOG_TARGET: &str = "fabric::api";

/// Shared API state exposed to handlers.
pub struct ApiState {
    facade: FaultInjectionFacade,
    mode: Mode,
    version: String,
    start: Instant,
}

impl ApiState {
    pub fn new(facade: FaultInjectionFacade, mode: Mode, version: impl Into<String>) -> Self {
        Self {
            facade,
            mode,
            version: version.into(),
            start: Instant::now(),
        }
    }

    fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_owned(),
            mode: self.mode,
            version: self.version.clone(),
            uptime_seconds: self.start.elapsed().as_secs(),
        }
    }
}

impl fmt::Debug for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiState")
            .field("mode", &self.mode)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Handle to the running API server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    /// Bound address; differs from the requested one when port 0 was asked for.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

/// Routes served by the admin API, without a listener. Useful to mount elsewhere.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/healthz", get(get_healthz))
        .route("/api/status", get(get_status))
        .route("/api/fail", post(post_fail))
        .route("/api/recover", post(post_recover))
        .route("/api/command", post(post_command))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve the admin API until [`ApiServer::shutdown`].
pub fn spawn_api_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<ApiServer> {
    let app = router(state);

    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    let bound = listener
        .local_addr()
        .context("failed to read API listener address")?;
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(target: LOG_TARGET, address = %bound, "api server listening");
        if let Err(err) = axum::serve(tcp_listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(target: LOG_TARGET, address = %bound, error = %err, "api server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub mode: Mode,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Body of `POST /api/fail` and `POST /api/recover`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementsRequest {
    pub elements: Vec<String>,
}

/// Body of `POST /api/command`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<FacadeError> for ApiError {
    fn from(err: FacadeError) -> Self {
        let status = match &err {
            FacadeError::Command(_) | FacadeError::NotARouter(_) | FacadeError::NotASwitch(_) => {
                StatusCode::BAD_REQUEST
            }
            FacadeError::Health(_) => StatusCode::NOT_FOUND,
            FacadeError::Recovery(RecoveryError::InProgress(_)) => StatusCode::CONFLICT,
            FacadeError::Recovery(RecoveryError::UnknownRouter(_)) => StatusCode::NOT_FOUND,
            FacadeError::Collaborator { .. } => StatusCode::BAD_GATEWAY,
            FacadeError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if err.is_client_error() {
            warn!(target: LOG_TARGET, status = status.as_u16(), error = %err, "admin request rejected");
        } else {
            error!(target: LOG_TARGET, status = status.as_u16(), error = %err, "admin request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

fn require_elements(
    command: &'static str,
    request: ElementsRequest,
) -> Result<Vec<String>, ApiError> {
    if request.elements.is_empty() {
        return Err(FacadeError::from(CommandError::MissingArgument {
            command,
            argument: "at least one element",
        })
        .into());
    }
    Ok(request.elements)
}

async fn get_healthz(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(state.health())
}

async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusReport> {
    Json(state.facade.status())
}

async fn post_fail(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ElementsRequest>,
) -> Result<Json<Vec<ElementStatus>>, ApiError> {
    let elements = require_elements("fail", request)?;
    Ok(Json(state.facade.inject_failure(&elements)?))
}

async fn post_recover(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ElementsRequest>,
) -> Result<Json<RecoverySummary>, ApiError> {
    let elements = require_elements("recover", request)?;
    Ok(Json(state.facade.trigger_recovery(&elements).await?))
}

async fn post_command(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<Value>, ApiError> {
    let command: AdminCommand = request.command.parse().map_err(FacadeError::from)?;
    info!(target: LOG_TARGET, command = %command, "admin command received");
    Ok(Json(state.facade.execute(command).await?))
}
