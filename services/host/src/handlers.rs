//! Axum handlers for the control surface.
//!
//! Every handler turns the request into a [`HostCommand`] for the session
//! task; none of them touch coordinator state directly.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use pepper_core::{CoordinatorInput, CoordinatorSnapshot, InterruptionRequest, InterruptionSource};
use tracing::{debug, error, info};

use crate::{
    models::{ControlResponse, ErrorResponse, MessagePayload, TouchPayload},
    session::HostCommand,
    state::AppState,
    touch::touch_message,
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unavailable(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Unavailable(message) => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn submit(state: &AppState, command: HostCommand) -> Result<Json<ControlResponse>, ApiError> {
    state
        .commands
        .send(command)
        .map_err(|_| ApiError::Unavailable("Session supervisor is not running".to_string()))?;
    Ok(Json(ControlResponse::accepted()))
}

/// A touch sensor fired. Repeats within the debounce window are ignored.
pub async fn touch(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TouchPayload>,
) -> Result<Json<ControlResponse>, ApiError> {
    let sensor = payload.sensor.trim();
    if sensor.is_empty() {
        return Err(ApiError::BadRequest("sensor must not be empty".to_string()));
    }
    if !state.touch.accept(sensor, Instant::now()) {
        debug!(sensor, "Touch debounced");
        return Ok(Json(ControlResponse::debounced()));
    }
    info!(sensor, "Touch");
    let request =
        InterruptionRequest::interrupt_and_respond(InterruptionSource::Touch, touch_message(sensor));
    submit(
        &state,
        HostCommand::Apply(CoordinatorInput::Interruption(request)),
    )
}

/// The status indicator was tapped: stop speaking, or toggle mute.
pub async fn status_tap(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ControlResponse>, ApiError> {
    submit(&state, HostCommand::Apply(CoordinatorInput::StatusTap))
}

pub async fn toggle_mute(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ControlResponse>, ApiError> {
    submit(&state, HostCommand::Apply(CoordinatorInput::MuteToggle))
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MessagePayload>,
) -> Result<Json<ControlResponse>, ApiError> {
    let text = payload.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }
    let request = InterruptionRequest {
        source: InterruptionSource::System,
        payload: Some(text.to_string()),
        request_response: payload.request_response,
        allow_during_speech: payload.allow_interrupt,
        mute: None,
    };
    submit(
        &state,
        HostCommand::Apply(CoordinatorInput::Interruption(request)),
    )
}

/// Drops the current realtime session and connects a new one.
pub async fn restart_session(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ControlResponse>, ApiError> {
    submit(&state, HostCommand::Restart)
}

pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<CoordinatorSnapshot> {
    Json(state.snapshot.borrow().clone())
}
