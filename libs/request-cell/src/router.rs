// libs/request-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn request_routes(state: Arc<AppConfig>) -> Router {
    // Every request operation requires an authenticated subject.
    let protected_routes = Router::new()
        .route("/prescription", post(handlers::create_prescription_request))
        .route("/exam", post(handlers::create_exam_request))
        .route("/consultation", post(handlers::create_consultation_request))
        .route("/{kind}/{request_id}", get(handlers::get_request))
        .route("/{kind}/{request_id}/status", patch(handlers::update_request_status))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}
