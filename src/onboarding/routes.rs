//! REST endpoints for the onboarding status snapshot.
//!
//! Read-only: presentation mutates the session through the manager's
//! methods, never through these routes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use super::manager::OnboardingManager;

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub manager: Arc<OnboardingManager>,
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// GET /api/onboarding/status
///
/// Current phase, survey answers (if started), and the derived survey
/// fields.
async fn get_status(State(state): State<OnboardingRouteState>) -> impl IntoResponse {
    Json(state.manager.status().await)
}

/// GET /api/onboarding/survey
///
/// The survey answers, or 404 if the survey has not been started.
async fn get_survey(State(state): State<OnboardingRouteState>) -> impl IntoResponse {
    match state.manager.current_survey_state().await {
        Some(survey) => Json(survey).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "No survey in progress"})),
        )
            .into_response(),
    }
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/onboarding/status", get(get_status))
        .route("/api/onboarding/survey", get(get_survey))
        .with_state(state)
}
