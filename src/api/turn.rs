//! Turn control endpoints
//!
//! Thin HTTP wrappers over [`ControllerHandle`](crate::controller::ControllerHandle):
//! - `GET /api/turn` current status snapshot
//! - `POST /api/turn/start|end|toggle` user actions
//! - `PUT /api/turn/ready` readiness gate

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::Error;
use crate::controller::{TurnState, TurnStatus};
use crate::voice::TurnId;

/// Response for a started turn
#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub turn: TurnId,
    pub state: TurnState,
}

/// Response for a toggle action
#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub state: TurnState,
}

/// Body for `PUT /api/turn/ready`
#[derive(Debug, Deserialize)]
pub struct ReadyRequest {
    pub ready: bool,
}

/// Build turn control router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/start", post(start))
        .route("/end", post(end))
        .route("/toggle", post(toggle))
        .route("/ready", put(set_ready))
        .with_state(state)
}

async fn status(State(state): State<Arc<ApiState>>) -> Json<TurnStatus> {
    Json(state.controller.status())
}

async fn start(State(state): State<Arc<ApiState>>) -> Result<Json<StartResponse>, TurnApiError> {
    let turn = state.controller.start_turn().await?;
    Ok(Json(StartResponse {
        turn,
        state: state.controller.state(),
    }))
}

async fn end(State(state): State<Arc<ApiState>>) -> Result<Json<TurnStatus>, TurnApiError> {
    state.controller.end_turn().await?;
    Ok(Json(state.controller.status()))
}

async fn toggle(State(state): State<Arc<ApiState>>) -> Result<Json<ToggleResponse>, TurnApiError> {
    let next = state.controller.toggle_capture().await?;
    Ok(Json(ToggleResponse { state: next }))
}

async fn set_ready(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ReadyRequest>,
) -> Result<Json<TurnStatus>, TurnApiError> {
    let status = state.controller.set_ready(request.ready).await?;
    Ok(Json(status))
}

/// Turn API errors
#[derive(Debug)]
pub struct TurnApiError(Error);

impl From<Error> for TurnApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for TurnApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code) = match &self.0 {
            Error::InvalidState { .. } => (StatusCode::CONFLICT, "invalid_state"),
            Error::Cancelled => (StatusCode::CONFLICT, "cancelled"),
            Error::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "not_ready"),
            Error::DeviceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "device_unavailable"),
            Error::ControllerClosed => (StatusCode::SERVICE_UNAVAILABLE, "controller_closed"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        let message = self.0.to_string();
        tracing::debug!(code, error = %message, "turn action rejected");

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}
