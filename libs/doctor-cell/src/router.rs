use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, DoctorCellState};

pub fn doctor_routes(state: DoctorCellState) -> Router {
    let public_routes = Router::new()
        .route("/{doctor_id}/availability", get(handlers::list_availability))
        .route("/{doctor_id}/appointment-types", get(handlers::list_appointment_types));

    let protected_routes = Router::new()
        .route("/{doctor_id}/availability", post(handlers::create_availability))
        .route("/{doctor_id}/availability/{block_id}", put(handlers::update_availability))
        .route("/{doctor_id}/appointment-types", post(handlers::create_appointment_type))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
