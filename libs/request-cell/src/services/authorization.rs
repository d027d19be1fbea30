// libs/request-cell/src/services/authorization.rs
use shared_models::auth::User;
use tracing::debug;

use crate::models::{RequestStatus, ServiceRequest};

/// Stateless policy evaluator. Rules are evaluated in order, first match
/// wins, and anything not explicitly allowed is denied: a newly introduced
/// status is unreachable until it is wired in here.
///
/// Pure over the already-loaded request record; never touches the datastore.
pub fn can_perform(actor: &User, request: &ServiceRequest, desired_status: RequestStatus) -> bool {
    let allowed = match desired_status {
        // Picking a request up for analysis is a doctor/admin action.
        RequestStatus::Analyzing => actor.is_doctor() || actor.is_admin(),

        // A request with no doctor yet (payment webhook advanced it) is
        // claimed by the first doctor who takes it into review.
        RequestStatus::InReview => {
            is_assigned_doctor(actor, request)
                || (request.doctor_id.is_none() && actor.is_doctor())
                || actor.is_admin()
        }

        // Verdicts belong to the assigned doctor (or an admin).
        RequestStatus::Approved
        | RequestStatus::Rejected
        | RequestStatus::CorrectionNeeded => {
            is_assigned_doctor(actor, request) || actor.is_admin()
        }

        // Returning a request to pending is the owning patient's move.
        RequestStatus::Pending => is_owner(actor, request) || actor.is_admin(),

        // Explicit allowlist: everything else is denied regardless of role.
        _ => false,
    };

    if !allowed {
        debug!(
            actor_id = %actor.id,
            request_id = %request.id,
            desired_status = %desired_status,
            "authorization denied"
        );
    }

    allowed
}

fn is_owner(actor: &User, request: &ServiceRequest) -> bool {
    request.patient_id.to_string() == actor.id
}

fn is_assigned_doctor(actor: &User, request: &ServiceRequest) -> bool {
    actor.is_doctor()
        && request
            .doctor_id
            .map(|id| id.to_string() == actor.id)
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn user(id: &str, role: &str) -> User {
        User {
            id: id.to_string(),
            email: None,
            role: Some(role.to_string()),
            metadata: None,
            created_at: None,
        }
    }

    fn request(patient_id: Uuid, doctor_id: Option<Uuid>, status: RequestStatus) -> ServiceRequest {
        ServiceRequest {
            id: Uuid::new_v4(),
            patient_id,
            doctor_id,
            service_subtype: "chronic_renewal".to_string(),
            price: 49.0,
            status,
            doctor_notes: None,
            rejection_reason: None,
            validated_at: None,
            document_ref: None,
            payload: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn doctor_can_pick_up_for_analysis() {
        let req = request(Uuid::new_v4(), None, RequestStatus::PaymentPending);
        let doctor = user(&Uuid::new_v4().to_string(), "doctor");
        let patient = user(&req.patient_id.to_string(), "patient");

        assert!(can_perform(&doctor, &req, RequestStatus::Analyzing));
        assert!(!can_perform(&patient, &req, RequestStatus::Analyzing));
    }

    #[test]
    fn only_assigned_doctor_may_issue_verdicts() {
        let doctor_a = Uuid::new_v4();
        let doctor_b = Uuid::new_v4();
        let req = request(Uuid::new_v4(), Some(doctor_b), RequestStatus::Analyzing);

        let unassigned = user(&doctor_a.to_string(), "doctor");
        let assigned = user(&doctor_b.to_string(), "doctor");

        for verdict in [
            RequestStatus::Approved,
            RequestStatus::Rejected,
            RequestStatus::CorrectionNeeded,
            RequestStatus::InReview,
        ] {
            assert!(!can_perform(&unassigned, &req, verdict));
            assert!(can_perform(&assigned, &req, verdict));
        }
    }

    #[test]
    fn unassigned_request_is_claimed_via_review() {
        let req = request(Uuid::new_v4(), None, RequestStatus::Analyzing);
        let doctor = user(&Uuid::new_v4().to_string(), "doctor");

        // Any doctor may take an unassigned request into review, but a
        // verdict still requires assignment.
        assert!(can_perform(&doctor, &req, RequestStatus::InReview));
        assert!(!can_perform(&doctor, &req, RequestStatus::Approved));
        assert!(!can_perform(&doctor, &req, RequestStatus::Rejected));
    }

    #[test]
    fn reassignment_scenario() {
        let doctor_a = Uuid::new_v4();
        let doctor_b = Uuid::new_v4();

        let before = request(Uuid::new_v4(), Some(doctor_b), RequestStatus::Analyzing);
        let actor_a = user(&doctor_a.to_string(), "doctor");
        assert!(!can_perform(&actor_a, &before, RequestStatus::Approved));

        // After reassignment to doctor-A, the verdict is theirs to make.
        let after = request(before.patient_id, Some(doctor_a), RequestStatus::Analyzing);
        assert!(can_perform(&actor_a, &after, RequestStatus::Approved));
    }

    #[test]
    fn patient_owns_the_pending_edge() {
        let patient_id = Uuid::new_v4();
        let req = request(patient_id, None, RequestStatus::CorrectionNeeded);

        let owner = user(&patient_id.to_string(), "patient");
        let stranger = user(&Uuid::new_v4().to_string(), "patient");

        assert!(can_perform(&owner, &req, RequestStatus::Pending));
        assert!(!can_perform(&stranger, &req, RequestStatus::Pending));
    }

    #[test]
    fn admin_is_allowed_on_every_wired_status() {
        let req = request(Uuid::new_v4(), Some(Uuid::new_v4()), RequestStatus::Analyzing);
        let admin = user(&Uuid::new_v4().to_string(), "admin");

        for status in [
            RequestStatus::Analyzing,
            RequestStatus::InReview,
            RequestStatus::Approved,
            RequestStatus::Rejected,
            RequestStatus::CorrectionNeeded,
            RequestStatus::Pending,
        ] {
            assert!(can_perform(&admin, &req, status));
        }
    }

    /// Default-deny over the full role x target grid: statuses with no
    /// explicit rule are unreachable for everyone, admin included.
    #[test]
    fn unwired_statuses_are_denied_for_all_roles() {
        let req = request(Uuid::new_v4(), Some(Uuid::new_v4()), RequestStatus::Approved);

        for role in ["patient", "doctor", "admin", "auditor"] {
            let actor = user(&Uuid::new_v4().to_string(), role);
            for status in [
                RequestStatus::PaymentPending,
                RequestStatus::Completed,
                RequestStatus::Expired,
            ] {
                assert!(
                    !can_perform(&actor, &req, status),
                    "{} unexpectedly allowed to set {}",
                    role,
                    status
                );
            }
        }
    }

    #[test]
    fn unknown_role_is_denied_everywhere() {
        let req = request(Uuid::new_v4(), Some(Uuid::new_v4()), RequestStatus::Analyzing);
        let actor = user(&Uuid::new_v4().to_string(), "support");

        for status in RequestStatus::ALL {
            assert!(!can_perform(&actor, &req, status));
        }
    }
}
