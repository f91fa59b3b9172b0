//! Axum router for the control surface.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::{handlers, state::AppState, ws::audio_handler};

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/touch", post(handlers::touch))
        .route("/status-tap", post(handlers::status_tap))
        .route("/mute", post(handlers::toggle_mute))
        .route("/message", post(handlers::send_message))
        .route("/session/restart", post(handlers::restart_session))
        .route("/state", get(handlers::get_state))
        .route("/audio", get(audio_handler))
        .with_state(app_state)
}
