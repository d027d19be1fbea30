use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_key: String,
    pub payment_webhook_secret: String,
    pub payment_api_base_url: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            supabase_service_key: "test-service-key".to_string(),
            payment_webhook_secret: "test-webhook-secret".to_string(),
            payment_api_base_url: "http://localhost:54322".to_string(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_service_key: self.supabase_service_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            payment_webhook_secret: self.payment_webhook_secret.clone(),
            payment_api_base_url: self.payment_api_base_url.clone(),
            payment_api_token: "test-provider-token".to_string(),
            payment_api_timeout_secs: 2,
            rate_limit_fail_open: false,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

pub struct WebhookTestUtils;

impl WebhookTestUtils {
    /// Build an x-signature header the way the payment provider does:
    /// HMAC-SHA256 over `id:<data_id>;request-id:<request_id>;ts:<ts>;`.
    pub fn sign(secret: &str, data_id: &str, request_id: &str, ts: i64) -> String {
        let manifest = format!("id:{};request-id:{};ts:{};", data_id, request_id, ts);
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(manifest.as_bytes());
        let digest = mac.finalize().into_bytes();
        format!("ts={},v1={}", ts, hex::encode(digest))
    }
}

pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn request_row(
        id: &str,
        patient_id: &str,
        doctor_id: Option<&str>,
        status: &str,
        price: f64,
    ) -> serde_json::Value {
        json!({
            "id": id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "service_subtype": "chronic_renewal",
            "price": price,
            "status": status,
            "doctor_notes": null,
            "rejection_reason": null,
            "validated_at": null,
            "document_ref": null,
            "payload": {},
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn payment_row(
        id: &str,
        user_id: &str,
        request_id: &str,
        status: &str,
        provider_payment_id: Option<&str>,
    ) -> serde_json::Value {
        json!({
            "id": id,
            "user_id": user_id,
            "request_id": request_id,
            "request_kind": "prescription",
            "amount": 49.0,
            "status": status,
            "provider_payment_id": provider_payment_id,
            "paid_at": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn webhook_event_row(
        id: &str,
        external_event_id: &str,
        status: &str,
        retry_count: i32,
    ) -> serde_json::Value {
        json!({
            "id": id,
            "provider": "mercadopago",
            "external_event_id": external_event_id,
            "event_type": "payment",
            "payload": {},
            "status": status,
            "retry_count": retry_count,
            "received_at": "2024-01-01T00:00:00Z",
            "processed_at": null,
            "error_message": null
        })
    }

    pub fn pricing_row(service_type: &str, service_subtype: &str, price: f64) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "service_type": service_type,
            "service_subtype": service_subtype,
            "price": price,
            "currency": "BRL",
            "active": true
        })
    }

    pub fn provider_payment_response(
        payment_id: &str,
        status: &str,
        external_reference: Option<&str>,
    ) -> serde_json::Value {
        json!({
            "id": payment_id,
            "status": status,
            "external_reference": external_reference,
            "transaction_amount": 49.0,
            "date_approved": "2024-01-01T00:00:00Z"
        })
    }
}
