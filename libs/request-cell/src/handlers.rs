// libs/request-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use security_cell::{RateLimitError, RateLimitPolicy, RateLimitService};
use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::client_addr;

use crate::models::{
    CreateConsultationBody, CreateExamBody, CreatePrescriptionBody, CreateRequestBody,
    RequestError, RequestKind, TransitionMetadata, UpdateStatusBody,
};
use crate::services::authorization::can_perform;
use crate::services::creation::CreationOrchestrator;
use crate::services::transition::TransitionEngine;

// Subject budgets; the address window runs at twice these.
const CREATE_REQUEST_POLICY: RateLimitPolicy = RateLimitPolicy::new("request_create", 10, 15);
const STATUS_UPDATE_POLICY: RateLimitPolicy = RateLimitPolicy::new("request_status_update", 30, 15);

// ==============================================================================
// REQUEST CREATION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_prescription_request(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Json(body): Json<CreatePrescriptionBody>,
) -> Result<Json<Value>, AppError> {
    create_request(&state, &user, &headers, CreateRequestBody::Prescription(body)).await
}

#[axum::debug_handler]
pub async fn create_exam_request(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Json(body): Json<CreateExamBody>,
) -> Result<Json<Value>, AppError> {
    create_request(&state, &user, &headers, CreateRequestBody::Exam(body)).await
}

#[axum::debug_handler]
pub async fn create_consultation_request(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Json(body): Json<CreateConsultationBody>,
) -> Result<Json<Value>, AppError> {
    create_request(&state, &user, &headers, CreateRequestBody::Consultation(body)).await
}

async fn create_request(
    state: &AppConfig,
    user: &User,
    headers: &HeaderMap,
    body: CreateRequestBody,
) -> Result<Json<Value>, AppError> {
    enforce_rate_limit(state, user, headers, &CREATE_REQUEST_POLICY).await?;

    let orchestrator = CreationOrchestrator::new(state);
    let request = orchestrator
        .create(user, body)
        .await
        .map_err(map_request_error)?;

    Ok(Json(json!({
        "success": true,
        "request": request
    })))
}

// ==============================================================================
// REQUEST RETRIEVAL AND STATUS HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_request(
    State(state): State<Arc<AppConfig>>,
    Path((kind, request_id)): Path<(String, Uuid)>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let kind = parse_kind(&kind)?;

    let engine = TransitionEngine::new(&state);
    let request = engine
        .get_request(kind, request_id)
        .await
        .map_err(map_request_error)?;

    // Only the owning patient, the assigned doctor, or an admin may view.
    let is_owner = request.patient_id.to_string() == user.id;
    let is_assigned = request
        .doctor_id
        .map(|id| id.to_string() == user.id)
        .unwrap_or(false);

    if !is_owner && !is_assigned && !user.is_admin() {
        return Err(AppError::Forbidden(
            "Not authorized to view this request".to_string(),
        ));
    }

    Ok(Json(json!({
        "success": true,
        "request": request
    })))
}

#[axum::debug_handler]
pub async fn update_request_status(
    State(state): State<Arc<AppConfig>>,
    Path((kind, request_id)): Path<(String, Uuid)>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    Json(body): Json<UpdateStatusBody>,
) -> Result<Json<Value>, AppError> {
    let kind = parse_kind(&kind)?;

    enforce_rate_limit(&state, &user, &headers, &STATUS_UPDATE_POLICY).await?;

    let engine = TransitionEngine::new(&state);
    let request = engine
        .get_request(kind, request_id)
        .await
        .map_err(map_request_error)?;

    if !can_perform(&user, &request, body.new_status) {
        return Err(AppError::Forbidden(
            "Not authorized to perform this status change".to_string(),
        ));
    }

    let metadata = TransitionMetadata {
        reason: body.reason,
        doctor_notes: body.doctor_notes,
        assign_doctor_id: body.assign_doctor_id,
    };

    let updated = engine
        .transition_with_retry(kind, request_id, body.new_status, &user, &metadata)
        .await
        .map_err(map_request_error)?;

    Ok(Json(json!({
        "success": true,
        "request": updated
    })))
}

// ==============================================================================
// HELPERS
// ==============================================================================

fn parse_kind(kind: &str) -> Result<RequestKind, AppError> {
    kind.parse()
        .map_err(|_| AppError::NotFound("Unknown request kind".to_string()))
}

async fn enforce_rate_limit(
    state: &AppConfig,
    user: &User,
    headers: &HeaderMap,
    policy: &RateLimitPolicy,
) -> Result<(), AppError> {
    let limiter = RateLimitService::new(state);
    let addr = client_addr(headers);

    limiter
        .enforce(&user.id, &addr, policy)
        .await
        .map_err(|e| match e {
            RateLimitError::Limited { .. } => {
                AppError::RateLimited("Too many requests, please try again later".to_string())
            }
            RateLimitError::Store(msg) => AppError::Database(msg),
        })
}

fn map_request_error(e: RequestError) -> AppError {
    match e {
        RequestError::NotFound => AppError::NotFound("Request not found".to_string()),
        RequestError::InvalidTransition { from, to } => AppError::InvalidTransition(format!(
            "Cannot change status from {} to {}",
            from, to
        )),
        RequestError::Conflict => {
            AppError::Conflict("The request was updated concurrently, please retry".to_string())
        }
        RequestError::Validation(msg) => AppError::BadRequest(msg),
        RequestError::PricingUnavailable(_) => {
            AppError::BadRequest("No pricing is available for the requested service".to_string())
        }
        RequestError::Database(msg) => AppError::Database(msg),
    }
}
