// libs/payment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use security_cell::{RateLimitError, RateLimitPolicy, RateLimitService};
use shared_config::AppConfig;
use shared_models::error::AppError;
use shared_utils::extractor::client_addr;

use crate::models::{id_to_string, WebhookBody, WebhookError, WebhookOutcome};
use crate::services::notify::Notifier;
use crate::services::signature::verify_signature;
use crate::services::webhook::WebhookPipeline;

// Webhooks carry no authenticated subject, so only the address window
// applies. The budget is generous; the limiter exists to absorb floods, not
// to pace a well-behaved provider.
const WEBHOOK_POLICY: RateLimitPolicy = RateLimitPolicy::new("payment_webhook", 60, 15);

#[derive(Clone)]
pub struct WebhookState {
    pub config: Arc<AppConfig>,
    pub notifier: Arc<dyn Notifier>,
}

#[axum::debug_handler]
pub async fn payment_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, AppError> {
    // A missing secret rejects every delivery rather than waving them
    // through unchecked.
    if !state.config.is_webhook_configured() {
        warn!("payment webhook received but no webhook secret is configured");
        return Err(AppError::Auth("Webhook not configured".to_string()));
    }

    // The caller is an untrusted external system; parse detail stays in the
    // server log and only the status code carries meaning.
    let body: WebhookBody = serde_json::from_value(payload.clone()).map_err(|e| {
        warn!("malformed webhook payload: {}", e);
        AppError::BadRequest("Malformed webhook payload".to_string())
    })?;

    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let data_id = body.data.as_ref().map(|d| id_to_string(&d.id));

    verify_signature(
        &state.config.payment_webhook_secret,
        data_id.as_deref().unwrap_or_default(),
        request_id,
        signature,
    )
    .map_err(|e| {
        warn!("webhook signature rejected: {}", e);
        AppError::Auth("Invalid webhook signature".to_string())
    })?;

    let addr = client_addr(&headers);
    let limiter = RateLimitService::new(&state.config);
    if let Err(e) = limiter.enforce_address(&addr, &WEBHOOK_POLICY).await {
        return Err(match e {
            RateLimitError::Limited { .. } => {
                AppError::RateLimited("Too many webhook deliveries".to_string())
            }
            RateLimitError::Store(msg) => AppError::Database(msg),
        });
    }

    // Only payment events carry effects; everything else is acknowledged so
    // the provider stops redelivering it.
    if body.event_type != "payment" {
        info!(event_type = %body.event_type, "ignoring non-payment webhook event");
        return Ok(Json(json!({ "success": true, "outcome": "ignored" })));
    }

    let data_id = data_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("Webhook payload has no data id".to_string()))?;

    // Deliveries without a provider event id fall back to the transport
    // request id, which the provider keeps stable across redeliveries.
    let external_event_id = body
        .id
        .as_ref()
        .map(id_to_string)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| request_id.to_string());

    if external_event_id.is_empty() {
        return Err(AppError::BadRequest(
            "Webhook delivery has no usable event id".to_string(),
        ));
    }

    let pipeline = WebhookPipeline::new(&state.config, state.notifier.clone());
    let outcome = pipeline
        .process(&external_event_id, &body.event_type, &data_id, &payload)
        .await
        .map_err(map_webhook_error)?;

    let label = match outcome {
        WebhookOutcome::Processed => "processed",
        WebhookOutcome::AlreadyProcessed => "already_processed",
        WebhookOutcome::Ignored => "ignored",
        WebhookOutcome::Unmatched => "unmatched",
        WebhookOutcome::Skipped => "skipped",
    };

    Ok(Json(json!({ "success": true, "outcome": label })))
}

fn map_webhook_error(e: WebhookError) -> AppError {
    match e {
        WebhookError::NotConfigured => AppError::Auth("Webhook not configured".to_string()),
        WebhookError::InvalidSignature => {
            AppError::Auth("Invalid webhook signature".to_string())
        }
        WebhookError::MalformedPayload(msg) => AppError::BadRequest(msg),
        WebhookError::Upstream(msg) => AppError::Upstream(msg),
        WebhookError::Database(msg) => AppError::Database(msg),
    }
}
