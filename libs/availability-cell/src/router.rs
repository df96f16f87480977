use std::sync::Arc;

use axum::{
    routing::{delete, get, patch, post},
    Router,
};

use shared_config::AppConfig;

use crate::handlers;

/// Routes nested under `/doctors` by the API crate.
pub fn availability_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/{doctor_id}/availability", post(handlers::create_availability))
        .route("/{doctor_id}/availability", get(handlers::list_availability))
        .route(
            "/{doctor_id}/availability/{availability_id}",
            patch(handlers::update_availability),
        )
        .route(
            "/{doctor_id}/availability/{availability_id}",
            delete(handlers::delete_availability),
        )
        .route(
            "/{doctor_id}/availability/{availability_id}/toggle",
            post(handlers::toggle_availability),
        )
        .route("/{doctor_id}/slots", get(handlers::get_available_slots))
        .with_state(state)
}
