// libs/payment-cell/src/services/webhook.rs
use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use request_cell::models::{RequestError, RequestStatus, TransitionMetadata};
use request_cell::services::transition::TransitionEngine;
use security_cell::models::NewAuditEvent;
use security_cell::services::audit::AuditService;
use shared_config::AppConfig;
use shared_database::{SupabaseClient, SupabaseError};
use shared_models::auth::User;

use crate::models::{
    map_provider_status, Payment, PaymentStatus, WebhookError, WebhookEvent, WebhookEventStatus,
    WebhookOutcome, PROVIDER_NAME,
};
use crate::services::notify::Notifier;
use crate::services::provider::PaymentProviderClient;

/// Actor recorded on request transitions triggered by the payment provider
/// rather than by a person.
fn system_actor() -> User {
    User {
        id: "system".to_string(),
        email: None,
        role: Some("system".to_string()),
        metadata: None,
        created_at: None,
    }
}

/// Runs one webhook delivery through the ledger, the provider truth fetch and
/// the payment update. Every step past the ledger claim is idempotent, so a
/// delivery that dies midway is safe to retry from scratch.
pub struct WebhookPipeline {
    supabase: Arc<SupabaseClient>,
    provider: PaymentProviderClient,
    engine: TransitionEngine,
    audit: AuditService,
    notifier: Arc<dyn Notifier>,
}

impl WebhookPipeline {
    pub fn new(config: &AppConfig, notifier: Arc<dyn Notifier>) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            provider: PaymentProviderClient::new(config),
            engine: TransitionEngine::with_client(supabase.clone()),
            audit: AuditService::with_client(supabase.clone()),
            supabase,
            notifier,
        }
    }

    pub async fn process(
        &self,
        external_event_id: &str,
        event_type: &str,
        data_id: &str,
        payload: &Value,
    ) -> Result<WebhookOutcome, WebhookError> {
        let event = match self
            .claim_event(external_event_id, event_type, payload)
            .await?
        {
            Some(event) => event,
            None => {
                info!(
                    external_event_id = %external_event_id,
                    "duplicate webhook delivery acknowledged"
                );
                return Ok(WebhookOutcome::AlreadyProcessed);
            }
        };

        // The webhook body is a hint. The provider API is the source of
        // truth for the payment's status.
        let provider_payment = match self.provider.fetch_payment(data_id).await {
            Ok(p) => p,
            Err(e) => {
                self.mark_failed(event.id, &e.to_string()).await;
                return Err(e);
            }
        };

        let mapped = match map_provider_status(&provider_payment.status) {
            Some(status) => status,
            None => {
                info!(
                    external_event_id = %external_event_id,
                    provider_status = %provider_payment.status,
                    "unrecognized provider status, acknowledging without effect"
                );
                self.mark_processed(event.id).await?;
                return Ok(WebhookOutcome::Ignored);
            }
        };

        let payment = match self.locate_payment(&provider_payment.id_string()).await? {
            Some(payment) => payment,
            None => {
                match self
                    .locate_by_reference(provider_payment.external_reference.as_deref())
                    .await?
                {
                    Some(payment) => {
                        self.backfill_provider_id(&payment, &provider_payment.id_string())
                            .await;
                        payment
                    }
                    None => {
                        warn!(
                            external_event_id = %external_event_id,
                            provider_payment_id = %provider_payment.id_string(),
                            marker = "unmatched_webhook",
                            "webhook matched no internal payment"
                        );
                        self.mark_processed(event.id).await?;
                        return Ok(WebhookOutcome::Unmatched);
                    }
                }
            }
        };

        if !payment.status.may_become(mapped) {
            info!(
                payment_id = %payment.id,
                current = %payment.status,
                incoming = %mapped,
                "suppressing backward payment transition"
            );
            self.mark_processed(event.id).await?;
            return Ok(WebhookOutcome::Skipped);
        }

        let newly_completed =
            mapped == PaymentStatus::Completed && payment.status != PaymentStatus::Completed;

        self.update_payment(&payment, mapped, newly_completed)
            .await?;

        if newly_completed {
            self.advance_request(&payment).await?;
            self.notifier.payment_completed(&payment).await;
        }

        self.mark_processed(event.id).await?;

        self.audit
            .record_best_effort(
                NewAuditEvent::new(
                    "system",
                    "system",
                    "payment",
                    &payment.id.to_string(),
                    "webhook_processed",
                )
                .with_metadata(json!({
                    "external_event_id": external_event_id,
                    "provider_status": provider_payment.status,
                    "mapped_status": mapped.to_string(),
                })),
            )
            .await;

        info!(
            external_event_id = %external_event_id,
            payment_id = %payment.id,
            status = %mapped,
            "webhook delivery processed"
        );
        Ok(WebhookOutcome::Processed)
    }

    /// Claim the event in the ledger. Returns `None` when the event id is
    /// already in a terminal processed state; for a known-but-unfinished
    /// event the retry counter is bumped and processing continues.
    async fn claim_event(
        &self,
        external_event_id: &str,
        event_type: &str,
        payload: &Value,
    ) -> Result<Option<WebhookEvent>, WebhookError> {
        let path = format!(
            "/rest/v1/webhook_events?provider=eq.{}&external_event_id=eq.{}&select=*&limit=1",
            PROVIDER_NAME,
            urlencoding::encode(external_event_id)
        );
        let existing: Vec<WebhookEvent> = self
            .supabase
            .service_request(Method::GET, &path, None)
            .await
            .map_err(|e| WebhookError::Database(e.to_string()))?;

        if let Some(event) = existing.into_iter().next() {
            if event.status == WebhookEventStatus::Processed {
                return Ok(None);
            }
            let patched: Vec<WebhookEvent> = self
                .supabase
                .service_request_with_headers(
                    Method::PATCH,
                    &format!("/rest/v1/webhook_events?id=eq.{}", event.id),
                    Some(json!({
                        "retry_count": event.retry_count + 1,
                        "status": WebhookEventStatus::Pending,
                    })),
                    &[("Prefer", "return=representation")],
                )
                .await
                .map_err(|e| WebhookError::Database(e.to_string()))?;
            return Ok(patched.into_iter().next().or(Some(event)));
        }

        let inserted: Result<Vec<WebhookEvent>, SupabaseError> = self
            .supabase
            .service_request_with_headers(
                Method::POST,
                "/rest/v1/webhook_events",
                Some(json!({
                    "provider": PROVIDER_NAME,
                    "external_event_id": external_event_id,
                    "event_type": event_type,
                    "payload": payload,
                    "status": WebhookEventStatus::Pending,
                    "retry_count": 0,
                })),
                &[("Prefer", "return=representation")],
            )
            .await;

        match inserted {
            Ok(rows) => Ok(rows.into_iter().next()),
            // The unique (provider, external_event_id) index caught a
            // concurrent delivery of the same event.
            Err(SupabaseError::Conflict(_)) => Ok(None),
            Err(e) => Err(WebhookError::Database(e.to_string())),
        }
    }

    async fn locate_payment(
        &self,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>, WebhookError> {
        let path = format!(
            "/rest/v1/payments?provider_payment_id=eq.{}&select=*&limit=1",
            urlencoding::encode(provider_payment_id)
        );
        let rows: Vec<Payment> = self
            .supabase
            .service_request(Method::GET, &path, None)
            .await
            .map_err(|e| WebhookError::Database(e.to_string()))?;
        Ok(rows.into_iter().next())
    }

    /// Payments created before the provider assigned an id are findable only
    /// through the request id we passed as the external reference.
    async fn locate_by_reference(
        &self,
        external_reference: Option<&str>,
    ) -> Result<Option<Payment>, WebhookError> {
        let request_id = match external_reference.and_then(|r| Uuid::parse_str(r).ok()) {
            Some(id) => id,
            None => return Ok(None),
        };

        let path = format!(
            "/rest/v1/payments?request_id=eq.{}&select=*&limit=1",
            request_id
        );
        let rows: Vec<Payment> = self
            .supabase
            .service_request(Method::GET, &path, None)
            .await
            .map_err(|e| WebhookError::Database(e.to_string()))?;
        Ok(rows.into_iter().next())
    }

    async fn backfill_provider_id(&self, payment: &Payment, provider_payment_id: &str) {
        let result: Result<Vec<Value>, _> = self
            .supabase
            .service_request_with_headers(
                Method::PATCH,
                &format!("/rest/v1/payments?id=eq.{}", payment.id),
                Some(json!({ "provider_payment_id": provider_payment_id })),
                &[("Prefer", "return=representation")],
            )
            .await;

        if let Err(e) = result {
            warn!(
                payment_id = %payment.id,
                "failed to backfill provider payment id: {}",
                e
            );
        }
    }

    async fn update_payment(
        &self,
        payment: &Payment,
        status: PaymentStatus,
        newly_completed: bool,
    ) -> Result<(), WebhookError> {
        let mut changes = json!({
            "status": status,
            "updated_at": Utc::now(),
        });
        if newly_completed {
            changes["paid_at"] = json!(Utc::now());
        }

        let _: Vec<Value> = self
            .supabase
            .service_request_with_headers(
                Method::PATCH,
                &format!("/rest/v1/payments?id=eq.{}", payment.id),
                Some(changes),
                &[("Prefer", "return=representation")],
            )
            .await
            .map_err(|e| WebhookError::Database(e.to_string()))?;
        Ok(())
    }

    /// Move the paid request out of payment_pending. A request that already
    /// moved on (or disappeared) is logged and tolerated so a redelivered
    /// completion cannot wedge the ledger.
    async fn advance_request(&self, payment: &Payment) -> Result<(), WebhookError> {
        let result = self
            .engine
            .transition_with_retry(
                payment.request_kind,
                payment.request_id,
                RequestStatus::Analyzing,
                &system_actor(),
                &TransitionMetadata::default(),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(RequestError::InvalidTransition { from, to }) => {
                warn!(
                    request_id = %payment.request_id,
                    from = %from,
                    to = %to,
                    "paid request not in a payable state, leaving as is"
                );
                Ok(())
            }
            Err(RequestError::NotFound) => {
                warn!(
                    request_id = %payment.request_id,
                    "paid request no longer exists"
                );
                Ok(())
            }
            Err(e) => Err(WebhookError::Database(e.to_string())),
        }
    }

    async fn mark_processed(&self, event_id: Uuid) -> Result<(), WebhookError> {
        let _: Vec<Value> = self
            .supabase
            .service_request_with_headers(
                Method::PATCH,
                &format!("/rest/v1/webhook_events?id=eq.{}", event_id),
                Some(json!({
                    "status": WebhookEventStatus::Processed,
                    "processed_at": Utc::now(),
                    "error_message": null,
                })),
                &[("Prefer", "return=representation")],
            )
            .await
            .map_err(|e| WebhookError::Database(e.to_string()))?;
        Ok(())
    }

    async fn mark_failed(&self, event_id: Uuid, message: &str) {
        let result: Result<Vec<Value>, _> = self
            .supabase
            .service_request_with_headers(
                Method::PATCH,
                &format!("/rest/v1/webhook_events?id=eq.{}", event_id),
                Some(json!({
                    "status": WebhookEventStatus::Failed,
                    "error_message": message,
                })),
                &[("Prefer", "return=representation")],
            )
            .await;

        if let Err(e) = result {
            warn!(event_id = %event_id, "failed to mark webhook event failed: {}", e);
        }
    }
}
