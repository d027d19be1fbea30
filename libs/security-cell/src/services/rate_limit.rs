use std::sync::Arc;

use chrono::{Duration, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{RateLimitError, RateLimitPolicy};

/// Sliding-window attempt counter over the `rate_limit_attempts` table.
/// Advisory throttling only: it takes no lock against the transition engine,
/// and insertion races undercount slightly rather than corrupt state.
pub struct RateLimitService {
    supabase: Arc<SupabaseClient>,
    fail_open: bool,
}

impl RateLimitService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            fail_open: config.rate_limit_fail_open,
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>, fail_open: bool) -> Self {
        Self { supabase, fail_open }
    }

    /// Count attempts for (key, endpoint) within the window; if under budget,
    /// record this attempt and allow. A denial consumes no budget.
    pub async fn check_and_record(
        &self,
        subject_key: &str,
        endpoint: &str,
        max_attempts: u32,
        window_minutes: i64,
    ) -> Result<bool, RateLimitError> {
        let window_start = (Utc::now() - Duration::minutes(window_minutes)).to_rfc3339();

        let path = format!(
            "/rest/v1/rate_limit_attempts?subject_key=eq.{}&endpoint=eq.{}&attempted_at=gte.{}&select=id&limit={}",
            urlencoding::encode(subject_key),
            urlencoding::encode(endpoint),
            urlencoding::encode(&window_start),
            max_attempts + 1,
        );

        let attempts: Vec<Value> = self
            .supabase
            .service_request(Method::GET, &path, None)
            .await
            .map_err(|e| RateLimitError::Store(e.to_string()))?;

        if attempts.len() >= max_attempts as usize {
            debug!(
                subject_key,
                endpoint,
                attempts = attempts.len(),
                "rate limit window exhausted"
            );
            return Ok(false);
        }

        // Best-effort record: a lost insert undercounts by one, which is
        // acceptable for advisory throttling.
        let insert = self
            .supabase
            .service_request_with_headers::<Vec<Value>>(
                Method::POST,
                "/rest/v1/rate_limit_attempts",
                Some(json!({
                    "subject_key": subject_key,
                    "endpoint": endpoint,
                    "attempted_at": Utc::now().to_rfc3339(),
                })),
                &[("Prefer", "return=representation")],
            )
            .await;

        if let Err(e) = insert {
            warn!(subject_key, endpoint, "failed to record rate limit attempt: {}", e);
        }

        Ok(true)
    }

    /// Run both windows for a mutating entry point: the subject budget and
    /// the looser address budget. Called before any side effect.
    pub async fn enforce(
        &self,
        user_id: &str,
        client_addr: &str,
        policy: &RateLimitPolicy,
    ) -> Result<(), RateLimitError> {
        let subject_key = format!("user:{}", user_id);
        let address_key = format!("addr:{}", client_addr);

        let subject_allowed = self
            .guarded_check(&subject_key, policy.endpoint, policy.max_attempts, policy.window_minutes)
            .await?;
        if !subject_allowed {
            return Err(RateLimitError::Limited {
                endpoint: policy.endpoint.to_string(),
            });
        }

        let address_allowed = self
            .guarded_check(&address_key, policy.endpoint, policy.address_budget(), policy.window_minutes)
            .await?;
        if !address_allowed {
            return Err(RateLimitError::Limited {
                endpoint: policy.endpoint.to_string(),
            });
        }

        Ok(())
    }

    /// Address-only enforcement, for entry points with no authenticated
    /// subject (the payment webhook).
    pub async fn enforce_address(
        &self,
        client_addr: &str,
        policy: &RateLimitPolicy,
    ) -> Result<(), RateLimitError> {
        let address_key = format!("addr:{}", client_addr);

        let allowed = self
            .guarded_check(&address_key, policy.endpoint, policy.address_budget(), policy.window_minutes)
            .await?;
        if !allowed {
            return Err(RateLimitError::Limited {
                endpoint: policy.endpoint.to_string(),
            });
        }

        Ok(())
    }

    async fn guarded_check(
        &self,
        key: &str,
        endpoint: &str,
        max_attempts: u32,
        window_minutes: i64,
    ) -> Result<bool, RateLimitError> {
        match self
            .check_and_record(key, endpoint, max_attempts, window_minutes)
            .await
        {
            Ok(allowed) => Ok(allowed),
            Err(e) => {
                if self.fail_open {
                    warn!("rate limit store unavailable, failing open: {}", e);
                    Ok(true)
                } else {
                    error!("rate limit store unavailable, failing closed: {}", e);
                    Err(RateLimitError::Limited {
                        endpoint: endpoint.to_string(),
                    })
                }
            }
        }
    }
}
