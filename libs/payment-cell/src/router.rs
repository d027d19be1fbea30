// libs/payment-cell/src/router.rs
use axum::{routing::post, Router};

use crate::handlers::{self, WebhookState};

/// Webhook routes authenticate by signature, not by bearer token, so they
/// sit outside the auth middleware.
pub fn webhook_routes(state: WebhookState) -> Router {
    Router::new()
        .route("/payment", post(handlers::payment_webhook))
        .with_state(state)
}
