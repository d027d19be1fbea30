// libs/request-cell/src/services/pricing.rs
use std::sync::Arc;

use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, info};

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{RequestError, RequestKind};

/// Fallback consultation subtype when no specialty-specific entry exists.
const GENERAL_CONSULTATION_SUBTYPE: &str = "general";

#[derive(Debug, Deserialize)]
struct PricingRow {
    price: f64,
}

/// Looks prices up in the `service_pricing` table keyed by
/// (service_type, service_subtype). The returned number is authoritative:
/// client-supplied prices are never consulted anywhere in the core.
pub struct PricingResolver {
    supabase: Arc<SupabaseClient>,
}

impl PricingResolver {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Fixed price for a (kind, subtype) pair.
    pub async fn resolve(&self, kind: RequestKind, subtype: &str) -> Result<f64, RequestError> {
        let price = self
            .lookup(kind, subtype)
            .await?
            .ok_or_else(|| RequestError::PricingUnavailable(format!("{}/{}", kind, subtype)))?;

        info!(kind = %kind, subtype, price, "resolved service price");
        Ok(price)
    }

    /// Consultation price: per-minute rate for the specialty-derived subtype
    /// (falling back to the general rate) times the duration.
    pub async fn resolve_consultation(
        &self,
        specialty: &str,
        duration_minutes: i32,
    ) -> Result<f64, RequestError> {
        let subtype = specialty.trim().to_lowercase();

        let per_minute = match self.lookup(RequestKind::Consultation, &subtype).await? {
            Some(rate) => rate,
            None => {
                debug!(specialty = %subtype, "no specialty rate, using general fallback");
                self.lookup(RequestKind::Consultation, GENERAL_CONSULTATION_SUBTYPE)
                    .await?
                    .ok_or_else(|| {
                        RequestError::PricingUnavailable(format!(
                            "consultation/{}",
                            GENERAL_CONSULTATION_SUBTYPE
                        ))
                    })?
            }
        };

        let price = per_minute * duration_minutes as f64;
        info!(
            specialty = %subtype,
            duration_minutes,
            per_minute,
            price,
            "resolved consultation price"
        );
        Ok(price)
    }

    async fn lookup(&self, kind: RequestKind, subtype: &str) -> Result<Option<f64>, RequestError> {
        let path = format!(
            "/rest/v1/service_pricing?service_type=eq.{}&service_subtype=eq.{}&active=eq.true&select=price&limit=1",
            kind,
            urlencoding::encode(subtype),
        );

        let rows: Vec<PricingRow> = self
            .supabase
            .service_request(Method::GET, &path, None)
            .await
            .map_err(|e| RequestError::Database(e.to_string()))?;

        Ok(rows.into_iter().next().map(|row| row.price))
    }
}
