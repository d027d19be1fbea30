// libs/payment-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use request_cell::models::RequestKind;

pub const PROVIDER_NAME: &str = "mercadopago";

// ==============================================================================
// PAYMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Once completed, a payment only ever moves to refunded. This guard is
    /// what stops a stale "pending" redelivery from undoing a completed
    /// payment.
    pub fn may_become(&self, target: PaymentStatus) -> bool {
        match self {
            PaymentStatus::Completed => target == PaymentStatus::Refunded,
            _ => true,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Processing => write!(f, "processing"),
            PaymentStatus::Completed => write!(f, "completed"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Refunded => write!(f, "refunded"),
        }
    }
}

/// Fixed translation of the provider's status vocabulary. Unknown values map
/// to nothing and are acknowledged without effect, since redelivery of an
/// unrecognized status cannot help.
pub fn map_provider_status(provider_status: &str) -> Option<PaymentStatus> {
    match provider_status {
        "approved" => Some(PaymentStatus::Completed),
        "pending" => Some(PaymentStatus::Pending),
        "in_process" | "authorized" => Some(PaymentStatus::Processing),
        "rejected" | "cancelled" => Some(PaymentStatus::Failed),
        "refunded" | "charged_back" => Some(PaymentStatus::Refunded),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub request_id: Uuid,
    pub request_kind: RequestKind,
    pub amount: f64,
    pub status: PaymentStatus,
    pub provider_payment_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==============================================================================
// WEBHOOK LEDGER MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventStatus {
    Pending,
    Processed,
    Failed,
}

impl fmt::Display for WebhookEventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebhookEventStatus::Pending => write!(f, "pending"),
            WebhookEventStatus::Processed => write!(f, "processed"),
            WebhookEventStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One row per external event id; (provider, external_event_id) is unique and
/// is the sole deduplication key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub provider: String,
    pub external_event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: WebhookEventStatus,
    pub retry_count: i32,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

// ==============================================================================
// PROVIDER WIRE MODELS
// ==============================================================================

/// Provider-defined webhook body. Only `type` and `data.id` are trusted as
/// routing hints; authoritative state is always re-fetched.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookBody {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Option<WebhookBodyData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookBodyData {
    pub id: serde_json::Value,
}

/// The provider's authoritative view of one payment.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderPayment {
    pub id: serde_json::Value,
    pub status: String,
    pub external_reference: Option<String>,
}

impl ProviderPayment {
    pub fn id_string(&self) -> String {
        id_to_string(&self.id)
    }
}

/// Provider ids arrive as numbers or strings depending on the channel.
pub fn id_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Webhook signatures are not configured")]
    NotConfigured,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Payment provider error: {0}")]
    Upstream(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// Terminal disposition of one delivery, used for logging and the response
/// code. Anything here answers 200; errors answer 401/5xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Effects were applied and the ledger row is now processed.
    Processed,
    /// The ledger already held this event id in a terminal processed state.
    AlreadyProcessed,
    /// Irrelevant event type or unrecognized provider status.
    Ignored,
    /// No internal payment row matched; acknowledged since redelivery
    /// cannot help.
    Unmatched,
    /// Backward transition suppressed (payment already final).
    Skipped,
}
