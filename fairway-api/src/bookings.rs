use axum::{
    extract::{Json, Path, State},
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use fairway_booking::{
    BookingChanges, CancelBookingRequest, CancellationOutcome, DisputeEvidenceRequest, DisputeUpdate, EditOutcome,
    EditPreview, OpenDisputeRequest, ResolveDisputeRequest, TransferOutcome,
};
use fairway_core::{AuditEntry, Booking, BookingStatus, CustomerInfo};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::actor::{idempotency_key, CurrentActor};
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub new_owner: CustomerInfo,
}

#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    pub status: BookingStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/edits/preview", post(preview_edit))
        .route("/v1/bookings/{id}/edits", post(execute_edit))
        .route("/v1/bookings/{id}/transfer", post(transfer_booking))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
        .route("/v1/bookings/{id}/status", post(change_status))
        .route("/v1/bookings/{id}/audit", get(booking_audit))
        .route("/v1/bookings/{id}/disputes", post(open_dispute))
        .route("/v1/bookings/{id}/disputes/{dispute_id}/evidence", post(submit_dispute_evidence))
        .route("/v1/bookings/{id}/disputes/{dispute_id}/resolve", post(resolve_dispute))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: CurrentActor,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.orchestrator.get_booking(id, &actor.0).await?))
}

async fn preview_edit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: CurrentActor,
    Json(changes): Json<BookingChanges>,
) -> Result<Json<EditPreview>, AppError> {
    let preview = state.orchestrator.calculate_edit_preview(id, &changes, &actor.0).await?;
    Ok(Json(preview))
}

async fn execute_edit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: CurrentActor,
    headers: HeaderMap,
    Json(changes): Json<BookingChanges>,
) -> Result<Json<EditOutcome>, AppError> {
    let key = idempotency_key(&headers)?;
    let outcome = state.orchestrator.execute_edit(id, &changes, &actor.0, &key).await?;
    if outcome.replayed {
        info!("Edit {} for booking {} replayed", key, id);
    }
    Ok(Json(outcome))
}

async fn transfer_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: CurrentActor,
    Json(req): Json<TransferRequest>,
) -> Result<Json<TransferOutcome>, AppError> {
    let outcome = state.orchestrator.transfer_booking(id, req.new_owner, &actor.0).await?;
    Ok(Json(outcome))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: CurrentActor,
    headers: HeaderMap,
    Json(req): Json<CancelBookingRequest>,
) -> Result<Json<CancellationOutcome>, AppError> {
    let key = idempotency_key(&headers)?;
    let outcome = state.orchestrator.cancel_booking(id, &req, &actor.0, &key).await?;
    Ok(Json(outcome))
}

async fn change_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: CurrentActor,
    Json(req): Json<StatusChangeRequest>,
) -> Result<Json<Booking>, AppError> {
    let staff = actor.require_staff()?;
    let booking = state
        .orchestrator
        .change_status(id, req.status, staff, req.reason)
        .await?;
    Ok(Json(booking))
}

async fn booking_audit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: CurrentActor,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    actor.require_staff()?;
    Ok(Json(state.audit.get_booking_audit_history(id).await?))
}

async fn open_dispute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: CurrentActor,
    Json(req): Json<OpenDisputeRequest>,
) -> Result<Json<DisputeUpdate>, AppError> {
    let staff = actor.require_staff()?;
    Ok(Json(state.orchestrator.open_dispute(id, &req, staff).await?))
}

async fn submit_dispute_evidence(
    State(state): State<AppState>,
    Path((id, dispute_id)): Path<(Uuid, String)>,
    actor: CurrentActor,
    Json(req): Json<DisputeEvidenceRequest>,
) -> Result<Json<DisputeUpdate>, AppError> {
    let staff = actor.require_staff()?;
    let update = state
        .orchestrator
        .submit_dispute_evidence(id, &dispute_id, &req, staff)
        .await?;
    Ok(Json(update))
}

async fn resolve_dispute(
    State(state): State<AppState>,
    Path((id, dispute_id)): Path<(Uuid, String)>,
    actor: CurrentActor,
    Json(req): Json<ResolveDisputeRequest>,
) -> Result<Json<DisputeUpdate>, AppError> {
    let staff = actor.require_staff()?;
    let update = state.orchestrator.resolve_dispute(id, &dispute_id, &req, staff).await?;
    Ok(Json(update))
}
