// libs/request-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// CORE REQUEST MODELS
// ==============================================================================

/// The three request variants share one lifecycle; each lives in its own
/// table and carries a variant-specific payload the lifecycle core treats
/// as opaque.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Prescription,
    Exam,
    Consultation,
}

impl RequestKind {
    pub fn table_name(&self) -> &'static str {
        match self {
            RequestKind::Prescription => "prescription_requests",
            RequestKind::Exam => "exam_requests",
            RequestKind::Consultation => "consultation_requests",
        }
    }

    pub fn entity_name(&self) -> &'static str {
        match self {
            RequestKind::Prescription => "prescription_request",
            RequestKind::Exam => "exam_request",
            RequestKind::Consultation => "consultation_request",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Prescription => write!(f, "prescription"),
            RequestKind::Exam => write!(f, "exam"),
            RequestKind::Consultation => write!(f, "consultation"),
        }
    }
}

impl std::str::FromStr for RequestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prescription" => Ok(RequestKind::Prescription),
            "exam" => Ok(RequestKind::Exam),
            "consultation" => Ok(RequestKind::Consultation),
            other => Err(format!("Unknown request kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    PaymentPending,
    Analyzing,
    InReview,
    Approved,
    Rejected,
    CorrectionNeeded,
    Completed,
    Expired,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 9] = [
        RequestStatus::Pending,
        RequestStatus::PaymentPending,
        RequestStatus::Analyzing,
        RequestStatus::InReview,
        RequestStatus::Approved,
        RequestStatus::Rejected,
        RequestStatus::CorrectionNeeded,
        RequestStatus::Completed,
        RequestStatus::Expired,
    ];

    /// The transition table. This slice-per-state form is the contract:
    /// anything not listed here is an illegal edge and fails closed.
    pub fn allowed_next(&self) -> &'static [RequestStatus] {
        use RequestStatus::*;
        match self {
            Pending => &[PaymentPending, Analyzing, Expired],
            PaymentPending => &[Analyzing, Expired, Pending],
            Analyzing => &[InReview, Approved, Rejected, CorrectionNeeded],
            InReview => &[Approved, Rejected, CorrectionNeeded],
            CorrectionNeeded => &[Analyzing, Pending],
            // Completion of an approved request is driven by a separate
            // process; it is the one edge out of an otherwise terminal state.
            Approved => &[Completed],
            Rejected | Completed | Expired => &[],
        }
    }

    pub fn can_transition_to(&self, target: RequestStatus) -> bool {
        self.allowed_next().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::PaymentPending => write!(f, "payment_pending"),
            RequestStatus::Analyzing => write!(f, "analyzing"),
            RequestStatus::InReview => write!(f, "in_review"),
            RequestStatus::Approved => write!(f, "approved"),
            RequestStatus::Rejected => write!(f, "rejected"),
            RequestStatus::CorrectionNeeded => write!(f, "correction_needed"),
            RequestStatus::Completed => write!(f, "completed"),
            RequestStatus::Expired => write!(f, "expired"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub service_subtype: String,
    /// Fixed at creation by the pricing resolver, never recomputed from
    /// client input.
    pub price: f64,
    pub status: RequestStatus,
    pub doctor_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub validated_at: Option<DateTime<Utc>>,
    pub document_ref: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==============================================================================
// SERVICE SUBTYPES
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionKind {
    ChronicRenewal,
    AcuteMedication,
    Contraceptive,
}

impl fmt::Display for PrescriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrescriptionKind::ChronicRenewal => write!(f, "chronic_renewal"),
            PrescriptionKind::AcuteMedication => write!(f, "acute_medication"),
            PrescriptionKind::Contraceptive => write!(f, "contraceptive"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExamKind {
    LabPanel,
    Imaging,
    Screening,
}

impl fmt::Display for ExamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExamKind::LabPanel => write!(f, "lab_panel"),
            ExamKind::Imaging => write!(f, "imaging"),
            ExamKind::Screening => write!(f, "screening"),
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationItem {
    pub name: String,
    pub dosage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePrescriptionBody {
    pub kind: PrescriptionKind,
    pub medications: Vec<MedicationItem>,
    pub notes: Option<String>,
    /// Legacy clients still send a price; it is parsed so deserialization
    /// does not fail, and discarded unconditionally.
    #[serde(default)]
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExamBody {
    pub kind: ExamKind,
    pub exams: Vec<String>,
    pub image_ref: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConsultationBody {
    pub specialty: String,
    pub duration_minutes: i32,
    pub notes: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

/// Variant-dispatched creation input handed to the orchestrator.
#[derive(Debug, Clone)]
pub enum CreateRequestBody {
    Prescription(CreatePrescriptionBody),
    Exam(CreateExamBody),
    Consultation(CreateConsultationBody),
}

impl CreateRequestBody {
    pub fn kind(&self) -> RequestKind {
        match self {
            CreateRequestBody::Prescription(_) => RequestKind::Prescription,
            CreateRequestBody::Exam(_) => RequestKind::Exam,
            CreateRequestBody::Consultation(_) => RequestKind::Consultation,
        }
    }

    pub fn supplied_price(&self) -> Option<f64> {
        match self {
            CreateRequestBody::Prescription(b) => b.price,
            CreateRequestBody::Exam(b) => b.price,
            CreateRequestBody::Consultation(b) => b.price,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusBody {
    pub new_status: RequestStatus,
    pub reason: Option<String>,
    pub doctor_notes: Option<String>,
    /// Admin-only explicit doctor reassignment on a transition into
    /// `analyzing`.
    pub assign_doctor_id: Option<Uuid>,
}

/// Status-transition metadata carried through to the audit row and the
/// side-field rules.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransitionMetadata {
    pub reason: Option<String>,
    pub doctor_notes: Option<String>,
    pub assign_doctor_id: Option<Uuid>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Request not found")]
    NotFound,

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("Request was modified concurrently")]
    Conflict,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No pricing entry for {0}")]
    PricingUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),
}
