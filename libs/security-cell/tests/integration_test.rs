use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

use security_cell::models::{NewAuditEvent, RateLimitError, RateLimitPolicy};
use security_cell::services::{AuditService, RateLimitService};
use shared_config::AppConfig;
use shared_database::SupabaseClient;

const POLICY: RateLimitPolicy = RateLimitPolicy::new("test_endpoint", 3, 15);

fn client_for(mock_server: &MockServer) -> Arc<SupabaseClient> {
    let config = AppConfig {
        supabase_url: mock_server.uri(),
        supabase_anon_key: "test-anon-key".to_string(),
        supabase_service_key: "test-service-key".to_string(),
        supabase_jwt_secret: "test-secret".to_string(),
        payment_webhook_secret: "test-webhook-secret".to_string(),
        payment_api_base_url: mock_server.uri(),
        payment_api_token: "test-token".to_string(),
        payment_api_timeout_secs: 2,
        rate_limit_fail_open: false,
    };
    Arc::new(SupabaseClient::new(&config))
}

fn attempt_rows(count: usize) -> Vec<serde_json::Value> {
    (0..count).map(|i| json!({ "id": i })).collect()
}

#[tokio::test]
async fn allows_and_records_attempts_under_budget() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/rate_limit_attempts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(attempt_rows(1)))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rate_limit_attempts"))
        .respond_with(ResponseTemplate::new(201).set_body_json(attempt_rows(1)))
        .expect(2) // one record per window: subject and address
        .mount(&mock_server)
        .await;

    let limiter = RateLimitService::with_client(client_for(&mock_server), false);
    let result = limiter.enforce("user-1", "10.0.0.1", &POLICY).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn denies_at_subject_budget_without_consuming() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/rate_limit_attempts"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(attempt_rows(POLICY.max_attempts as usize)),
        )
        .mount(&mock_server)
        .await;

    // A denied attempt must not add a row, otherwise a client at the limit
    // could push its own window further into the future.
    Mock::given(method("POST"))
        .and(path("/rest/v1/rate_limit_attempts"))
        .respond_with(ResponseTemplate::new(201).set_body_json(attempt_rows(1)))
        .expect(0)
        .mount(&mock_server)
        .await;

    let limiter = RateLimitService::with_client(client_for(&mock_server), false);
    let result = limiter.enforce("user-1", "10.0.0.1", &POLICY).await;
    assert!(matches!(result, Err(RateLimitError::Limited { .. })));
}

#[tokio::test]
async fn address_window_runs_at_double_the_subject_budget() {
    let mock_server = MockServer::start().await;

    // Subject is under its budget; the address has used up the subject
    // budget but not the doubled address budget, so the call goes through.
    Mock::given(method("GET"))
        .and(path("/rest/v1/rate_limit_attempts"))
        .and(query_param("subject_key", "eq.user:user-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(attempt_rows(0)))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/rate_limit_attempts"))
        .and(query_param("subject_key", "eq.addr:10.0.0.1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(attempt_rows(POLICY.max_attempts as usize)),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rate_limit_attempts"))
        .respond_with(ResponseTemplate::new(201).set_body_json(attempt_rows(1)))
        .mount(&mock_server)
        .await;

    let limiter = RateLimitService::with_client(client_for(&mock_server), false);
    let result = limiter.enforce("user-1", "10.0.0.1", &POLICY).await;
    assert!(result.is_ok());
}

/// Matches only when the attempt count is filtered to the current window:
/// `attempted_at=gte.<ts>` with `<ts>` close to now minus the window.
struct WindowStartFilter {
    window_minutes: i64,
}

impl Match for WindowStartFilter {
    fn matches(&self, request: &Request) -> bool {
        let Some(value) = request
            .url
            .query_pairs()
            .find(|(key, _)| key == "attempted_at")
            .map(|(_, value)| value.into_owned())
        else {
            return false;
        };
        let Some(ts) = value.strip_prefix("gte.") else {
            return false;
        };
        let Ok(start) = DateTime::parse_from_rfc3339(ts) else {
            return false;
        };
        let expected = Utc::now() - Duration::minutes(self.window_minutes);
        (start.with_timezone(&Utc) - expected).num_seconds().abs() < 120
    }
}

#[tokio::test]
async fn attempts_outside_the_window_are_not_counted() {
    let mock_server = MockServer::start().await;

    // The count query must carry the window-start lower bound; without it
    // every historical attempt would count forever. Only a correctly
    // filtered GET matches, so if the filter were missing or wrong the
    // lookup would miss, the store call would fail, and enforcement would
    // fail closed below.
    Mock::given(method("GET"))
        .and(path("/rest/v1/rate_limit_attempts"))
        .and(WindowStartFilter {
            window_minutes: POLICY.window_minutes,
        })
        .respond_with(ResponseTemplate::new(200).set_body_json(attempt_rows(0)))
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rate_limit_attempts"))
        .respond_with(ResponseTemplate::new(201).set_body_json(attempt_rows(1)))
        .mount(&mock_server)
        .await;

    let limiter = RateLimitService::with_client(client_for(&mock_server), false);
    let result = limiter.enforce("user-1", "10.0.0.1", &POLICY).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn store_outage_fails_closed_by_default() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/rate_limit_attempts"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let limiter = RateLimitService::with_client(client_for(&mock_server), false);
    let result = limiter.enforce("user-1", "10.0.0.1", &POLICY).await;
    assert!(matches!(result, Err(RateLimitError::Limited { .. })));
}

#[tokio::test]
async fn store_outage_fails_open_when_configured() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/rate_limit_attempts"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let limiter = RateLimitService::with_client(client_for(&mock_server), true);
    let result = limiter.enforce("user-1", "10.0.0.1", &POLICY).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn audit_append_posts_the_event_row() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/audit_events"))
        .respond_with(ResponseTemplate::new(201).set_body_json(attempt_rows(1)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let audit = AuditService::with_client(client_for(&mock_server));
    let event = NewAuditEvent::new("user-1", "patient", "prescription_request", "req-1", "request_created")
        .with_metadata(json!({ "subtype": "chronic_renewal" }));

    assert!(audit.record(event).await.is_ok());
}

#[tokio::test]
async fn best_effort_audit_swallows_store_failures() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/audit_events"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let audit = AuditService::with_client(client_for(&mock_server));
    let event = NewAuditEvent::new("system", "system", "payment", "pay-1", "webhook_processed");

    // Must not panic or error; the failure only gets logged.
    audit.record_best_effort(event).await;
}
