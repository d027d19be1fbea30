use std::sync::Arc;

use axum::{routing::get, Router};

use payment_cell::handlers::WebhookState;
use payment_cell::router::webhook_routes;
use payment_cell::services::notify::{Notifier, SupabaseNotifier};
use request_cell::router::request_routes;
use shared_config::AppConfig;
use shared_database::SupabaseClient;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    let supabase = Arc::new(SupabaseClient::new(&state));
    let notifier: Arc<dyn Notifier> = Arc::new(SupabaseNotifier::new(supabase));

    let webhook_state = WebhookState {
        config: state.clone(),
        notifier,
    };

    Router::new()
        .route("/", get(|| async { "Recepta request core is running!" }))
        .nest("/requests", request_routes(state.clone()))
        .nest("/webhooks", webhook_routes(webhook_state))
}
