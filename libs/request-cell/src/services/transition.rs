// libs/request-cell/src/services/transition.rs
use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_models::auth::User;

use crate::models::{RequestError, RequestKind, RequestStatus, ServiceRequest, TransitionMetadata};

/// The state machine. Validates an edge against the static transition table,
/// computes status-triggered side fields, and applies the row update plus one
/// audit row in a single database transaction guarded by an expected-status
/// compare. Status never changes through any other path.
pub struct TransitionEngine {
    supabase: Arc<SupabaseClient>,
}

impl TransitionEngine {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn get_request(
        &self,
        kind: RequestKind,
        request_id: Uuid,
    ) -> Result<ServiceRequest, RequestError> {
        let path = format!(
            "/rest/v1/{}?id=eq.{}&select=*&limit=1",
            kind.table_name(),
            request_id
        );

        let rows: Vec<ServiceRequest> = self
            .supabase
            .service_request(Method::GET, &path, None)
            .await
            .map_err(|e| RequestError::Database(e.to_string()))?;

        rows.into_iter().next().ok_or(RequestError::NotFound)
    }

    /// Apply one validated transition. Performs its own load; callers that
    /// already hold the row (for authorization) still go through this so the
    /// expected-status guard always reflects a fresh read.
    pub async fn transition(
        &self,
        kind: RequestKind,
        request_id: Uuid,
        new_status: RequestStatus,
        actor: &User,
        metadata: &TransitionMetadata,
    ) -> Result<ServiceRequest, RequestError> {
        let current = self.get_request(kind, request_id).await?;

        debug!(
            request_id = %request_id,
            from = %current.status,
            to = %new_status,
            "validating status transition"
        );

        if !current.status.can_transition_to(new_status) {
            warn!(
                request_id = %request_id,
                from = %current.status,
                to = %new_status,
                "invalid status transition attempted"
            );
            return Err(RequestError::InvalidTransition {
                from: current.status,
                to: new_status,
            });
        }

        let changes = self.side_fields(&current, new_status, actor, metadata)?;

        let updated: Vec<ServiceRequest> = self
            .supabase
            .rpc(
                "apply_request_transition",
                json!({
                    "p_table": kind.table_name(),
                    "p_request_id": request_id,
                    "p_expected_status": current.status.to_string(),
                    "p_new_status": new_status.to_string(),
                    "p_changes": changes,
                    "p_actor_id": actor.id,
                    "p_actor_role": actor.role.as_deref().unwrap_or("patient"),
                    "p_entity": kind.entity_name(),
                    "p_audit_metadata": json!({
                        "from": current.status.to_string(),
                        "to": new_status.to_string(),
                        "reason": metadata.reason,
                    }),
                }),
            )
            .await
            .map_err(|e| RequestError::Database(e.to_string()))?;

        match updated.into_iter().next() {
            Some(request) => {
                info!(
                    request_id = %request_id,
                    from = %current.status,
                    to = %new_status,
                    actor_id = %actor.id,
                    "status transition applied"
                );
                Ok(request)
            }
            // The guarded update matched nothing: either the row is gone or
            // a concurrent transition won the race.
            None => match self.get_request(kind, request_id).await {
                Ok(_) => Err(RequestError::Conflict),
                Err(RequestError::NotFound) => Err(RequestError::NotFound),
                Err(e) => Err(e),
            },
        }
    }

    /// Transition with one internal retry on `Conflict`, per the caller
    /// contract. The retry re-reads the row, so a transition that became
    /// legal (or illegal) under the winner's state is re-evaluated.
    pub async fn transition_with_retry(
        &self,
        kind: RequestKind,
        request_id: Uuid,
        new_status: RequestStatus,
        actor: &User,
        metadata: &TransitionMetadata,
    ) -> Result<ServiceRequest, RequestError> {
        match self
            .transition(kind, request_id, new_status, actor, metadata)
            .await
        {
            Err(RequestError::Conflict) => {
                debug!(request_id = %request_id, "transition lost a race, retrying once");
                self.transition(kind, request_id, new_status, actor, metadata)
                    .await
            }
            other => other,
        }
    }

    /// Status-triggered side fields written atomically with the status.
    fn side_fields(
        &self,
        current: &ServiceRequest,
        new_status: RequestStatus,
        actor: &User,
        metadata: &TransitionMetadata,
    ) -> Result<Value, RequestError> {
        let mut changes = json!({});

        match new_status {
            RequestStatus::Approved => {
                changes["validated_at"] = json!(Utc::now().to_rfc3339());
            }
            RequestStatus::Rejected => {
                let reason = metadata
                    .reason
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .ok_or_else(|| {
                        RequestError::Validation("A rejection reason is required".to_string())
                    })?;
                changes["rejection_reason"] = json!(reason);
            }
            RequestStatus::Analyzing => {
                // doctor_id is set at most once, on the first transition into
                // analyzing; only an admin may reassign it afterwards.
                if let Some(assign) = metadata.assign_doctor_id {
                    if !actor.is_admin() {
                        return Err(RequestError::Validation(
                            "Only an admin can reassign the doctor".to_string(),
                        ));
                    }
                    changes["doctor_id"] = json!(assign);
                } else if current.doctor_id.is_none() && actor.is_doctor() {
                    changes["doctor_id"] = json!(actor.id);
                }
            }
            RequestStatus::InReview => {
                // A doctor taking an unassigned request into review claims it.
                if current.doctor_id.is_none() && actor.is_doctor() {
                    changes["doctor_id"] = json!(actor.id);
                }
            }
            _ => {}
        }

        if let Some(notes) = metadata
            .doctor_notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
        {
            changes["doctor_notes"] = json!(notes);
        }

        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestStatus::*;

    #[test]
    fn transition_table_matches_contract() {
        assert_eq!(Pending.allowed_next(), &[PaymentPending, Analyzing, Expired]);
        assert_eq!(PaymentPending.allowed_next(), &[Analyzing, Expired, Pending]);
        assert_eq!(
            Analyzing.allowed_next(),
            &[InReview, Approved, Rejected, CorrectionNeeded]
        );
        assert_eq!(InReview.allowed_next(), &[Approved, Rejected, CorrectionNeeded]);
        assert_eq!(CorrectionNeeded.allowed_next(), &[Analyzing, Pending]);
        assert_eq!(Approved.allowed_next(), &[Completed]);
        assert!(Rejected.allowed_next().is_empty());
        assert!(Completed.allowed_next().is_empty());
        assert!(Expired.allowed_next().is_empty());
    }

    /// Closure over the full status grid: everything not in the edge table
    /// is rejected.
    #[test]
    fn transition_table_fails_closed() {
        for from in RequestStatus::ALL {
            for to in RequestStatus::ALL {
                let allowed = from.allowed_next().contains(&to);
                assert_eq!(
                    from.can_transition_to(to),
                    allowed,
                    "{} -> {} disagreement with edge table",
                    from,
                    to
                );
            }
        }

        // Self-loops never appear in the table.
        for status in RequestStatus::ALL {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn terminal_states() {
        assert!(Rejected.is_terminal());
        assert!(Completed.is_terminal());
        assert!(Expired.is_terminal());
        assert!(!Approved.is_terminal());
        assert!(!Pending.is_terminal());
    }
}
