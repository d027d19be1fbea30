// libs/payment-cell/src/services/notify.rs
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use shared_database::SupabaseClient;

use crate::models::Payment;

/// Outbound notification seam. The pipeline only knows this trait; delivery
/// failures are logged and never fail the webhook.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn payment_completed(&self, payment: &Payment);
}

/// Writes an in-app notification row for the paying user.
pub struct SupabaseNotifier {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseNotifier {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl Notifier for SupabaseNotifier {
    async fn payment_completed(&self, payment: &Payment) {
        let body = json!({
            "user_id": payment.user_id,
            "kind": "payment_completed",
            "title": "Payment confirmed",
            "body": format!(
                "Your payment for the {} request was confirmed.",
                payment.request_kind
            ),
            "metadata": {
                "payment_id": payment.id,
                "request_id": payment.request_id,
                "request_kind": payment.request_kind,
            },
        });

        let result: Result<Vec<serde_json::Value>, _> = self
            .supabase
            .service_request_with_headers(
                reqwest::Method::POST,
                "/rest/v1/notifications",
                Some(body),
                &[("Prefer", "return=representation")],
            )
            .await;

        match result {
            Ok(_) => info!(
                payment_id = %payment.id,
                user_id = %payment.user_id,
                "payment completion notification queued"
            ),
            Err(e) => warn!(
                payment_id = %payment.id,
                "failed to queue payment notification: {}",
                e
            ),
        }
    }
}

/// No-op notifier for tests and for deployments without notifications.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn payment_completed(&self, _payment: &Payment) {}
}
