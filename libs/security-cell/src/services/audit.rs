use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{info, warn};

use shared_config::AppConfig;
use shared_database::{SupabaseClient, SupabaseError};

use crate::models::NewAuditEvent;

/// Appends lifecycle events to the `audit_events` table. Transition audits
/// ride the transactional RPC instead; this service covers the best-effort
/// paths (request creation, webhook bookkeeping).
pub struct AuditService {
    supabase: Arc<SupabaseClient>,
}

impl AuditService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn record(&self, event: NewAuditEvent) -> Result<(), SupabaseError> {
        info!(
            actor_id = %event.actor_id,
            actor_role = %event.actor_role,
            entity = %event.entity,
            entity_id = %event.entity_id,
            action = %event.action,
            "AUDIT: {}", event.action
        );

        self.supabase
            .service_request_with_headers::<Vec<Value>>(
                Method::POST,
                "/rest/v1/audit_events",
                Some(json!({
                    "actor_id": event.actor_id,
                    "actor_role": event.actor_role,
                    "entity": event.entity,
                    "entity_id": event.entity_id,
                    "action": event.action,
                    "metadata": event.metadata,
                    "created_at": Utc::now().to_rfc3339(),
                })),
                &[("Prefer", "return=representation")],
            )
            .await?;

        Ok(())
    }

    /// Audit is observability, not the primary effect: a failed append is
    /// logged and swallowed.
    pub async fn record_best_effort(&self, event: NewAuditEvent) {
        let action = event.action.clone();
        if let Err(e) = self.record(event).await {
            warn!(action = %action, "audit append failed: {}", e);
        }
    }
}
