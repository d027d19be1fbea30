// libs/request-cell/src/services/creation.rs
use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::json;
use tracing::{info, warn};

use security_cell::{AuditService, NewAuditEvent};
use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_models::auth::User;

use crate::models::{
    CreateConsultationBody, CreateExamBody, CreatePrescriptionBody, CreateRequestBody,
    RequestError, RequestKind, RequestStatus, ServiceRequest,
};
use crate::services::pricing::PricingResolver;

const MAX_NOTES_LEN: usize = 2000;
const MAX_MEDICATION_NAME_LEN: usize = 200;
const MAX_LIST_ITEMS: usize = 20;
const MIN_CONSULTATION_MINUTES: i32 = 10;
const MAX_CONSULTATION_MINUTES: i32 = 120;

/// Creates new requests in the `pending` state: validate the payload shape,
/// resolve the authoritative price, persist, then append a best-effort audit
/// row.
pub struct CreationOrchestrator {
    supabase: Arc<SupabaseClient>,
    pricing: PricingResolver,
    audit: AuditService,
}

impl CreationOrchestrator {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            pricing: PricingResolver::with_client(Arc::clone(&supabase)),
            audit: AuditService::with_client(Arc::clone(&supabase)),
            supabase,
        }
    }

    pub async fn create(
        &self,
        actor: &User,
        body: CreateRequestBody,
    ) -> Result<ServiceRequest, RequestError> {
        let kind = body.kind();

        // Shape validation comes before any pricing or persistence work.
        self.validate(&body)?;

        if body.supplied_price().is_some() {
            // Hard security invariant: the client has no say in pricing.
            warn!(
                actor_id = %actor.id,
                kind = %kind,
                "client-supplied price field ignored"
            );
        }

        let (subtype, price, payload) = match &body {
            CreateRequestBody::Prescription(b) => {
                let subtype = b.kind.to_string();
                let price = self.pricing.resolve(kind, &subtype).await?;
                let payload = json!({
                    "medications": b.medications,
                    "notes": b.notes,
                });
                (subtype, price, payload)
            }
            CreateRequestBody::Exam(b) => {
                let subtype = b.kind.to_string();
                let price = self.pricing.resolve(kind, &subtype).await?;
                let payload = json!({
                    "exams": b.exams,
                    "image_ref": b.image_ref,
                    "notes": b.notes,
                });
                (subtype, price, payload)
            }
            CreateRequestBody::Consultation(b) => {
                let subtype = b.specialty.trim().to_lowercase();
                let price = self
                    .pricing
                    .resolve_consultation(&b.specialty, b.duration_minutes)
                    .await?;
                let payload = json!({
                    "specialty": subtype,
                    "duration_minutes": b.duration_minutes,
                    "notes": b.notes,
                });
                (subtype, price, payload)
            }
        };

        let now = Utc::now().to_rfc3339();
        let rows: Vec<ServiceRequest> = self
            .supabase
            .service_request_with_headers(
                Method::POST,
                &format!("/rest/v1/{}", kind.table_name()),
                Some(json!({
                    "patient_id": actor.id,
                    "service_subtype": subtype,
                    "price": price,
                    "status": RequestStatus::Pending.to_string(),
                    "payload": payload,
                    "created_at": now,
                    "updated_at": now,
                })),
                &[("Prefer", "return=representation")],
            )
            .await
            .map_err(|e| RequestError::Database(e.to_string()))?;

        let request = rows
            .into_iter()
            .next()
            .ok_or_else(|| RequestError::Database("insert returned no row".to_string()))?;

        info!(
            request_id = %request.id,
            kind = %kind,
            subtype = %request.service_subtype,
            price = request.price,
            "request created"
        );

        // Creation is the primary effect; audit is observability.
        self.audit
            .record_best_effort(
                NewAuditEvent::new(
                    &actor.id,
                    actor.role.as_deref().unwrap_or("patient"),
                    kind.entity_name(),
                    &request.id.to_string(),
                    "request_created",
                )
                .with_metadata(json!({
                    "subtype": request.service_subtype,
                    "price": request.price,
                })),
            )
            .await;

        Ok(request)
    }

    fn validate(&self, body: &CreateRequestBody) -> Result<(), RequestError> {
        match body {
            CreateRequestBody::Prescription(b) => self.validate_prescription(b),
            CreateRequestBody::Exam(b) => self.validate_exam(b),
            CreateRequestBody::Consultation(b) => self.validate_consultation(b),
        }
    }

    fn validate_prescription(&self, body: &CreatePrescriptionBody) -> Result<(), RequestError> {
        if body.medications.is_empty() {
            return Err(RequestError::Validation(
                "At least one medication is required".to_string(),
            ));
        }
        if body.medications.len() > MAX_LIST_ITEMS {
            return Err(RequestError::Validation(format!(
                "At most {} medications per request",
                MAX_LIST_ITEMS
            )));
        }
        for item in &body.medications {
            let name = item.name.trim();
            if name.is_empty() || name.len() > MAX_MEDICATION_NAME_LEN {
                return Err(RequestError::Validation(
                    "Medication names must be between 1 and 200 characters".to_string(),
                ));
            }
        }
        validate_notes(body.notes.as_deref())
    }

    fn validate_exam(&self, body: &CreateExamBody) -> Result<(), RequestError> {
        if body.exams.is_empty() {
            return Err(RequestError::Validation(
                "At least one exam is required".to_string(),
            ));
        }
        if body.exams.len() > MAX_LIST_ITEMS {
            return Err(RequestError::Validation(format!(
                "At most {} exams per request",
                MAX_LIST_ITEMS
            )));
        }
        for exam in &body.exams {
            let name = exam.trim();
            if name.is_empty() || name.len() > MAX_MEDICATION_NAME_LEN {
                return Err(RequestError::Validation(
                    "Exam names must be between 1 and 200 characters".to_string(),
                ));
            }
        }
        if let Some(image_ref) = body.image_ref.as_deref() {
            // Storage paths only: no traversal, bounded length.
            if image_ref.is_empty() || image_ref.len() > 512 || image_ref.contains("..") {
                return Err(RequestError::Validation(
                    "Invalid image reference".to_string(),
                ));
            }
        }
        validate_notes(body.notes.as_deref())
    }

    fn validate_consultation(&self, body: &CreateConsultationBody) -> Result<(), RequestError> {
        let specialty = body.specialty.trim();
        if specialty.is_empty() || specialty.len() > 100 {
            return Err(RequestError::Validation(
                "Specialty must be between 1 and 100 characters".to_string(),
            ));
        }
        if body.duration_minutes < MIN_CONSULTATION_MINUTES
            || body.duration_minutes > MAX_CONSULTATION_MINUTES
        {
            return Err(RequestError::Validation(format!(
                "Consultation duration must be between {} and {} minutes",
                MIN_CONSULTATION_MINUTES, MAX_CONSULTATION_MINUTES
            )));
        }
        validate_notes(body.notes.as_deref())
    }
}

fn validate_notes(notes: Option<&str>) -> Result<(), RequestError> {
    if let Some(notes) = notes {
        if notes.len() > MAX_NOTES_LEN {
            return Err(RequestError::Validation(format!(
                "Notes must be at most {} characters",
                MAX_NOTES_LEN
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExamKind, MedicationItem, PrescriptionKind};
    use shared_utils::test_utils::TestConfig;

    fn orchestrator() -> CreationOrchestrator {
        CreationOrchestrator::new(&TestConfig::default().to_app_config())
    }

    fn prescription(medications: Vec<MedicationItem>) -> CreateRequestBody {
        CreateRequestBody::Prescription(CreatePrescriptionBody {
            kind: PrescriptionKind::ChronicRenewal,
            medications,
            notes: None,
            price: None,
        })
    }

    #[test]
    fn prescription_requires_medications() {
        let err = orchestrator().validate(&prescription(vec![])).unwrap_err();
        assert!(matches!(err, RequestError::Validation(_)));
    }

    #[test]
    fn medication_name_bounds() {
        let too_long = MedicationItem {
            name: "x".repeat(MAX_MEDICATION_NAME_LEN + 1),
            dosage: None,
        };
        let err = orchestrator()
            .validate(&prescription(vec![too_long]))
            .unwrap_err();
        assert!(matches!(err, RequestError::Validation(_)));

        let ok = MedicationItem {
            name: "Metformin 850mg".to_string(),
            dosage: Some("1x daily".to_string()),
        };
        assert!(orchestrator().validate(&prescription(vec![ok])).is_ok());
    }

    #[test]
    fn exam_image_ref_rejects_traversal() {
        let body = CreateRequestBody::Exam(CreateExamBody {
            kind: ExamKind::Imaging,
            exams: vec!["chest x-ray".to_string()],
            image_ref: Some("../secrets/dump.pdf".to_string()),
            notes: None,
            price: None,
        });
        let err = orchestrator().validate(&body).unwrap_err();
        assert!(matches!(err, RequestError::Validation(_)));
    }

    #[test]
    fn consultation_duration_bounds() {
        for minutes in [0, 5, 121, -30] {
            let body = CreateRequestBody::Consultation(CreateConsultationBody {
                specialty: "dermatology".to_string(),
                duration_minutes: minutes,
                notes: None,
                price: None,
            });
            assert!(orchestrator().validate(&body).is_err(), "{} accepted", minutes);
        }

        let body = CreateRequestBody::Consultation(CreateConsultationBody {
            specialty: "dermatology".to_string(),
            duration_minutes: 30,
            notes: None,
            price: None,
        });
        assert!(orchestrator().validate(&body).is_ok());
    }

    #[test]
    fn notes_length_bound() {
        let body = CreateRequestBody::Consultation(CreateConsultationBody {
            specialty: "dermatology".to_string(),
            duration_minutes: 30,
            notes: Some("x".repeat(MAX_NOTES_LEN + 1)),
            price: None,
        });
        assert!(orchestrator().validate(&body).is_err());
    }
}
